use direct_agent::{
    Certificate, CertificateBuilder, DirectAgent, DistinguishedName, InMemoryCertificateStore,
    UniformTrustAnchorResolver,
};
use std::sync::Arc;

fn root(name: &str) -> anyhow::Result<Certificate> {
    Ok(
        CertificateBuilder::new(DistinguishedName::new().with_common_name(name))
            .ca(true)
            .self_signed()?,
    )
}

fn address_cert(address: &str, issuer: &Certificate) -> anyhow::Result<Certificate> {
    Ok(CertificateBuilder::new(DistinguishedName::for_address(address)).issued_by(issuer)?)
}

fn agent_for(
    domain: &str,
    private: &[&Certificate],
    public: &[&Certificate],
    anchors: &[&Certificate],
) -> anyhow::Result<DirectAgent> {
    Ok(DirectAgent::builder()
        .domains([domain])
        .private_resolver(Arc::new(InMemoryCertificateStore::with_certificates(
            private.iter().map(|c| (*c).clone()),
        )))
        .public_resolver(Arc::new(InMemoryCertificateStore::with_certificates(
            public.iter().map(|c| c.public()),
        )))
        .trust_anchors(Arc::new(UniformTrustAnchorResolver::new(
            anchors.iter().map(|c| c.public()).collect(),
        )))
        .build()?)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    println!("Testing Direct message round trip...");

    let hospital_root = root("Hospital Root CA")?;
    let clinic_root = root("Clinic Root CA")?;
    let rogue_root = root("Unknown Root CA")?;
    let doctor = address_cert("doctor@hospital.example", &hospital_root)?;
    let nurse = address_cert("nurse@clinic.example", &clinic_root)?;
    let intruder = address_cert("intruder@clinic.example", &rogue_root)?;

    let anchors = [&hospital_root, &clinic_root];
    let hospital = agent_for(
        "hospital.example",
        &[&doctor],
        &[&nurse, &intruder],
        &anchors,
    )?;
    let clinic = agent_for("clinic.example", &[&nurse], &[&doctor], &anchors)?;

    let message = "From: Dr. Smith <doctor@hospital.example>\r\n\
                   To: nurse@clinic.example, intruder@clinic.example\r\n\
                   Subject: Referral\r\n\
                   Message-ID: <referral-1@hospital.example>\r\n\
                   Content-Type: text/plain\r\n\
                   \r\n\
                   Please see the attached referral.\r\n";

    println!("\n=== Outgoing (hospital.example) ===");
    let outgoing = hospital.process_outgoing_text(message)?;
    println!("✅ Signed and encrypted");
    println!("   Recipients: {}", outgoing.recipients());
    let rejected = outgoing.rejected_recipients();
    if rejected.is_empty() {
        println!("❌ Expected intruder@clinic.example to be rejected");
    } else {
        println!("✅ Rejected: {rejected}");
    }
    println!(
        "   Content-Type: {}",
        outgoing.message().header("Content-Type").unwrap_or("-")
    );

    println!("\n=== Incoming (clinic.example) ===");
    let wire = outgoing.message().to_string();
    let incoming = clinic.process_incoming_text(&wire)?;
    for recipient in incoming.domain_recipients() {
        println!("✅ {} trust: {}", recipient, recipient.status());
    }
    let body = incoming.message().body_text();
    if body.contains("Please see the attached referral.") {
        println!("✅ Body recovered: {}", body.trim_end());
    } else {
        println!("❌ Body mismatch: {}", body.trim_end());
    }
    println!(
        "   Subject: {}",
        incoming.message().header("Subject").unwrap_or("-")
    );

    println!("\n=== Wrong key ===");
    let stranger = agent_for("clinic.example", &[&intruder], &[&doctor], &anchors)?;
    match stranger.process_incoming_text(&wire) {
        Ok(_) => println!("❌ Message decrypted without the recipient's key"),
        Err(e) => println!("✅ Rejected without the recipient's key: {e}"),
    }

    Ok(())
}
