use anyhow::Context;
use clap::{Arg, ArgMatches, Command};
use direct_agent::cert::pem::{decode_certificates, encode_certificate};
use direct_agent::config::parse_log_level;
use direct_agent::{
    CertificateBuilder, DirectAgent, DirectConfig, DistinguishedName, TrustEnforcementStatus,
};
use log::LevelFilter;
use std::process;

fn main() {
    let matches = Command::new("direct-agent")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Direct messaging agent: signs, encrypts and trust-checks mail between domains")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("/etc/direct-agent.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Load the configuration and its certificate stores, then exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("outgoing")
                .long("outgoing")
                .value_name("FILE")
                .help("Sign and encrypt a message file for its recipients")
                .conflicts_with("incoming")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("incoming")
                .long("incoming")
                .value_name("FILE")
                .help("Decrypt and verify a message file for the local recipients")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Write the processed message here instead of stdout")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("sender")
                .long("sender")
                .value_name("ADDRESS")
                .help("Envelope sender (MAIL FROM); requires --recipients")
                .requires("recipients")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("recipients")
                .long("recipients")
                .value_name("ADDRESSES")
                .help("Envelope recipients (RCPT TO), comma separated; requires --sender")
                .requires("sender")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("create-anchor")
                .long("create-anchor")
                .value_name("CN")
                .help("Create a self-signed trust anchor with this common name")
                .requires("out")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("issue-certificate")
                .long("issue-certificate")
                .value_name("EMAIL")
                .help("Issue an address (or domain) certificate signed by --issuer")
                .requires_all(["issuer", "out"])
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("issuer")
                .long("issuer")
                .value_name("FILE")
                .help("Issuer certificate file including its private key")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("out")
                .long("out")
                .value_name("FILE")
                .help("Destination file for generated certificates")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable debug logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let verbose = matches.get_flag("verbose");

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        init_logging(verbose, LevelFilter::Info);
        generate_default_config(generate_path);
        return;
    }

    if let Some(common_name) = matches.get_one::<String>("create-anchor") {
        init_logging(verbose, LevelFilter::Info);
        exit_on_error(create_anchor(&matches, common_name));
        return;
    }

    if let Some(address) = matches.get_one::<String>("issue-certificate") {
        init_logging(verbose, LevelFilter::Info);
        exit_on_error(issue_certificate(&matches, address));
        return;
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("/etc/direct-agent.yaml");
    let config = match DirectConfig::from_file(config_path) {
        Ok(config) => config,
        Err(e) => {
            init_logging(verbose, LevelFilter::Info);
            eprintln!("❌ Error loading configuration: {e:#}");
            process::exit(1);
        }
    };
    let level = parse_log_level(&config.logging.level).unwrap_or(LevelFilter::Info);
    init_logging(verbose, level);

    if matches.get_flag("test-config") {
        test_config(&config);
        return;
    }

    let agent = match config.build_agent() {
        Ok(agent) => agent,
        Err(e) => {
            eprintln!("❌ Failed to configure agent: {e:#}");
            process::exit(1);
        }
    };

    if let Some(path) = matches.get_one::<String>("outgoing") {
        exit_on_error(process_file(&agent, &matches, path, Direction::Outgoing));
    } else if let Some(path) = matches.get_one::<String>("incoming") {
        exit_on_error(process_file(&agent, &matches, path, Direction::Incoming));
    } else {
        println!("Nothing to do. Use --outgoing FILE or --incoming FILE to process a message,");
        println!("or --test-config to check the configuration.");
    }
}

fn init_logging(verbose: bool, level: LevelFilter) {
    let log_level = if verbose { LevelFilter::Debug } else { level };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();
}

fn exit_on_error(result: anyhow::Result<()>) {
    if let Err(e) = result {
        eprintln!("❌ {e:#}");
        process::exit(1);
    }
}

fn generate_default_config(path: &str) {
    let config = DirectConfig::default();
    match config.to_file(path) {
        Ok(()) => {
            println!("✅ Default configuration written to: {path}");
            println!("Edit the domains and certificate directories, then run with --test-config.");
        }
        Err(e) => {
            eprintln!("❌ Error writing configuration file: {e:#}");
            process::exit(1);
        }
    }
}

fn test_config(config: &DirectConfig) {
    println!("🔍 Testing configuration...");
    println!();

    if let Err(e) = config.validate() {
        println!("❌ Configuration validation failed:");
        println!("   {e:#}");
        process::exit(1);
    }
    println!("✅ Configuration values are valid");

    match config.build_agent() {
        Ok(agent) => {
            println!("✅ Certificate stores and trust anchors loaded");
            println!();
            println!("📋 Agent summary:");
            println!("   Domains: {}", agent.domains().join(", "));
            println!(
                "   Encryption: {}",
                if agent.is_encryption_enabled() { "enabled" } else { "disabled" }
            );
            println!(
                "   Wrapping: {}",
                if agent.is_wrapping_enabled() { "enabled" } else { "disabled" }
            );
            println!("   Minimum trust: {}", agent.min_trust_requirement());
            if agent.min_trust_requirement() == TrustEnforcementStatus::SuccessOffline {
                println!("   ⚠️  Senders without published certificates are accepted");
            }
        }
        Err(e) => {
            println!("❌ Failed to build agent:");
            println!("   {e:#}");
            process::exit(1);
        }
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Incoming,
    Outgoing,
}

fn process_file(
    agent: &DirectAgent,
    matches: &ArgMatches,
    path: &str,
    direction: Direction,
) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read message file {path}"))?;
    let envelope = matches
        .get_one::<String>("sender")
        .zip(matches.get_one::<String>("recipients"));

    let (processed, rejected) = match direction {
        Direction::Outgoing => {
            let message = match envelope {
                Some((sender, recipients)) => {
                    agent.process_outgoing_text_with_envelope(&text, recipients, sender)
                }
                None => agent.process_outgoing_text(&text),
            }?;
            (
                message.envelope().to_bytes(),
                message.rejected_recipients().to_header_value(),
            )
        }
        Direction::Incoming => {
            let message = match envelope {
                Some((sender, recipients)) => {
                    agent.process_incoming_text_with_envelope(&text, recipients, sender)
                }
                None => agent.process_incoming_text(&text),
            }?;
            if let Some(signature) = message.signature() {
                for signer in signature.signer_certificates() {
                    eprintln!("🔏 Signed by {}", signer.subject());
                }
            }
            (
                message.envelope().to_bytes(),
                message.rejected_recipients().to_header_value(),
            )
        }
    };

    if !rejected.is_empty() {
        eprintln!("⚠️  Rejected recipients: {rejected}");
    }

    match matches.get_one::<String>("output") {
        Some(output) => {
            std::fs::write(output, &processed)
                .with_context(|| format!("cannot write {output}"))?;
            eprintln!("✅ Processed message written to {output}");
        }
        None => print!("{}", String::from_utf8_lossy(&processed)),
    }
    Ok(())
}

fn create_anchor(matches: &ArgMatches, common_name: &str) -> anyhow::Result<()> {
    let out = required_arg(matches, "out")?;
    let anchor = CertificateBuilder::new(DistinguishedName::new().with_common_name(common_name))
        .ca(true)
        .valid_for_days(3650)
        .self_signed()?;
    std::fs::write(out, encode_certificate(&anchor)?)
        .with_context(|| format!("cannot write {out}"))?;
    println!("✅ Trust anchor '{common_name}' written to {out}");
    println!("   Thumbprint: {}", anchor.thumbprint());
    Ok(())
}

fn issue_certificate(matches: &ArgMatches, address: &str) -> anyhow::Result<()> {
    let issuer_path = required_arg(matches, "issuer")?;
    let out = required_arg(matches, "out")?;

    let text = std::fs::read_to_string(issuer_path)
        .with_context(|| format!("cannot read issuer file {issuer_path}"))?;
    let issuer = decode_certificates(&text)?
        .into_iter()
        .find(|c| c.has_private_key())
        .with_context(|| format!("{issuer_path} holds no certificate with a private key"))?;

    let subject = if address.contains('@') {
        DistinguishedName::for_address(address)
    } else {
        DistinguishedName::new().with_common_name(address)
    };
    let certificate = CertificateBuilder::new(subject).issued_by(&issuer)?;
    std::fs::write(out, encode_certificate(&certificate)?)
        .with_context(|| format!("cannot write {out}"))?;
    println!("✅ Certificate for {address} issued by {}", issuer.subject());
    println!("   Written to {out} (includes private key)");
    println!("   Thumbprint: {}", certificate.thumbprint());
    Ok(())
}

fn required_arg<'a>(matches: &'a ArgMatches, name: &str) -> anyhow::Result<&'a str> {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .with_context(|| format!("--{name} is required"))
}
