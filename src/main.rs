use std::{error::Error, fs, path::PathBuf, str::FromStr};

use clap::{Args, Parser, Subcommand, ValueEnum};
use pretty_hex::PrettyHex;
use rtsa::{
    algorithm::Algorithm,
    config::{self, TsaConfig},
    der::{asn1::ObjectIdentifier, Encode},
    request::{parse_and_validate, TimeStampReqBuilder},
    response::decode_response,
    utils::to_hex_str,
    verify::TimeStampToken,
    TimeStampAuthority,
};

#[derive(Parser)]
#[command(name = "rtsa")]
#[command(about = "RFC 3161 time-stamp authority")]
#[command(version)]
struct Cli {
    /// Log filter, overrides RUST_LOG (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "FILTER")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a time-stamp query (.tsq) with a response (.tsr)
    Reply {
        /// DER TimeStampReq
        #[arg(short, long, value_name = "TSQ")]
        query: PathBuf,

        /// Where to write the DER TimeStampResp
        #[arg(short, long, value_name = "TSR")]
        out: PathBuf,

        #[command(flatten)]
        tsa: TsaArgs,
    },

    /// Build a time-stamp query for a file
    Query {
        /// File to time-stamp
        #[arg(short, long, value_name = "FILE")]
        data: PathBuf,

        #[arg(long, value_enum, default_value = "sha256")]
        digest: DigestArg,

        /// Leave the nonce out
        #[arg(long)]
        no_nonce: bool,

        /// Ask for the TSA certificate in the response
        #[arg(long)]
        cert_req: bool,

        /// Requested policy OID
        #[arg(long, value_name = "OID")]
        policy: Option<String>,

        #[arg(short, long, value_name = "TSQ")]
        out: PathBuf,
    },

    /// Print and verify a time-stamp response
    Inspect {
        #[arg(short, long, value_name = "TSR")]
        response: PathBuf,

        /// Query the response should answer
        #[arg(short, long, value_name = "TSQ")]
        query: Option<PathBuf>,
    },
}

#[derive(Args)]
struct TsaArgs {
    /// PEM chain, TSA certificate first
    #[arg(long, env = "TSA_CHAIN_PATH", default_value = config::DEFAULT_CHAIN_PATH)]
    chain: PathBuf,

    /// PEM private key (PKCS#8, PKCS#1 or SEC1)
    #[arg(long, env = "TSA_KEY_PATH", default_value = config::DEFAULT_KEY_PATH)]
    key: PathBuf,

    /// Password of an encrypted PKCS#8 key
    #[arg(long, env = "TSA_KEY_PASSWORD", hide_env_values = true)]
    key_password: Option<String>,

    #[arg(long, env = "TSA_SERIAL_PATH", default_value = config::DEFAULT_SERIAL_PATH)]
    serial: PathBuf,

    #[arg(long, env = "TSA_POLICY_OID", default_value = config::DEFAULT_POLICY_OID)]
    policy: String,

    #[arg(long, env = "TSA_ACCURACY_SECONDS", default_value_t = config::DEFAULT_ACCURACY_SECONDS, allow_negative_numbers = true)]
    accuracy_seconds: i64,

    #[arg(long, env = "TSA_ACCURACY_MILLIS")]
    accuracy_millis: Option<u16>,

    #[arg(long, env = "TSA_ACCURACY_MICROS")]
    accuracy_micros: Option<u16>,

    /// Name the TSA in TSTInfo
    #[arg(long, env = "TSA_INCLUDE_NAME")]
    include_name: bool,
}

impl From<TsaArgs> for TsaConfig {
    fn from(args: TsaArgs) -> Self {
        Self {
            chain_path: args.chain,
            key_path: args.key,
            key_password: args.key_password,
            serial_path: args.serial,
            policy_oid: args.policy,
            accuracy_seconds: args.accuracy_seconds,
            accuracy_millis: args.accuracy_millis,
            accuracy_micros: args.accuracy_micros,
            include_tsa_name: args.include_name,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum DigestArg {
    Sha256,
    Sha384,
}

impl From<DigestArg> for Algorithm {
    fn from(value: DigestArg) -> Self {
        match value {
            DigestArg::Sha256 => Algorithm::Sha256,
            DigestArg::Sha384 => Algorithm::Sha384,
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(filter) = &cli.log_level {
        logger.parse_filters(filter);
    }
    logger.init();

    match cli.command {
        Commands::Reply { query, out, tsa } => {
            let tsa = TimeStampAuthority::from_config(&tsa.into())?;
            let response = tsa.process(&fs::read(&query)?);
            fs::write(&out, &response)?;

            let decoded = decode_response(&response)?;
            println!("status: {:?}", decoded.status);
        }
        Commands::Query {
            data,
            digest,
            no_nonce,
            cert_req,
            policy,
            out,
        } => {
            let mut builder = TimeStampReqBuilder::for_data(digest.into(), &fs::read(&data)?)?;
            builder.set_cert_req(cert_req);
            if !no_nonce {
                // 正的 64 位随机数
                builder.set_nonce((rand::random::<u64>() >> 1).max(1));
            }
            if let Some(policy) = policy {
                let policy = ObjectIdentifier::from_str(&policy)
                    .map_err(|err| format!("policy OID {:?}: {}", policy, err))?;
                builder.set_req_policy(policy);
            }

            fs::write(&out, builder.to_der()?)?;
        }
        Commands::Inspect { response, query } => inspect(&response, query.as_ref())?,
    }

    Ok(())
}

fn inspect(response: &PathBuf, query: Option<&PathBuf>) -> Result<(), Box<dyn Error>> {
    let decoded = decode_response(&fs::read(response)?)?;

    println!("status:       {:?}", decoded.status);
    for text in &decoded.status_strings {
        println!("status text:  {}", text);
    }
    for failure in &decoded.failure_info {
        println!("failure:      {:?}", failure);
    }

    let ci = match &decoded.token {
        Some(ci) => ci,
        None => return Ok(()),
    };
    let token = TimeStampToken::from_content_info(ci)?;
    let tst_info = token.tst_info();

    println!("policy:       {}", tst_info.policy);
    println!(
        "imprint:      {} {}",
        Algorithm::from(&tst_info.message_imprint.hash_algorithm),
        to_hex_str(tst_info.message_imprint.hashed_message.as_bytes())
    );
    println!("serial:       {}", tst_info.serial_number);
    println!("gen time:     {}", tst_info.gen_time.to_date_time());
    if let Some(accuracy) = &tst_info.accuracy {
        println!(
            "accuracy:     {}s {}ms {}us",
            accuracy.seconds.unwrap_or_default(),
            accuracy.millis.unwrap_or_default(),
            accuracy.micros.unwrap_or_default()
        );
    }
    if let Some(nonce) = &tst_info.nonce {
        println!("nonce:        {}", to_hex_str(nonce.as_bytes()));
    }
    if let Some(tsa) = &tst_info.tsa {
        println!("tsa:          {:?}", tsa);
    }
    println!("signer:       {}", token.signer());
    for (index, cert) in token.certificates().iter().enumerate() {
        println!("certificate:  #{} {}", index, cert);
    }
    println!("verify:       {:?}", token.verify()?);

    if let Some(query) = query {
        let req = parse_and_validate(&fs::read(query)?)?;
        println!("matches:      {}", token.matches_request(&req));
    }

    println!();
    println!("{:?}", ci.to_der()?.hex_dump());

    Ok(())
}
