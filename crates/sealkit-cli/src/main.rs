//! Sealkit CLI - exercise the crypto layer from the shell.

#![forbid(unsafe_code)]

use std::fs;
use std::io::{self, Read};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sealkit_common::config::{Role, DEFAULT_READ_BUFFER};
use sealkit_common::SessionProfile;
use sealkit_crypto::codec::{base64_decode, base64_encode, from_hex, to_upper_hex};
use sealkit_crypto::{
    self_test, Curve, Des, Drbg, EcKeyContext, Endpoint, EntropyPool, RandomByteSource, TlsSession, TripleDes,
    VerifyMode,
};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "sealkit")]
#[command(about = "Sealkit crypto and TLS tools")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the generator and cipher known-answer tests
    SelfTest,

    /// Generate an EC key pair and print it as hex
    Keygen {
        /// Curve name (secp256r1, secp384r1, secp256k1)
        #[arg(short, long, default_value = "secp256r1")]
        curve: Curve,
    },

    /// Print the compressed public key of a PEM private key
    PublicKey {
        /// Path to the PEM key
        #[arg(short, long)]
        key: PathBuf,
    },

    /// ECDSA-sign a digest with a PEM private key
    Sign {
        /// Path to the PEM key
        #[arg(short, long)]
        key: PathBuf,

        /// Digest to sign, hex encoded
        #[arg(short, long, conflicts_with = "message", required_unless_present = "message")]
        digest: Option<String>,

        /// Sign the SHA-256 of this text instead
        #[arg(short, long)]
        message: Option<String>,
    },

    /// DES / triple-DES over hex data
    Cipher {
        #[command(subcommand)]
        op: CipherOp,
    },

    /// Base64 encode or decode (reads stdin when no input is given)
    Base64 {
        #[arg(short, long)]
        decode: bool,

        input: Option<String>,
    },

    /// Open a TLS session, send a message, print the reply
    Connect {
        /// Server address (host:port)
        #[arg(short, long)]
        addr: String,

        /// JSON session profile
        #[arg(short, long, env = "SEALKIT_PROFILE")]
        profile: Option<PathBuf>,

        /// Expected server name
        #[arg(long)]
        hostname: Option<String>,

        /// Peer verification (none, optional, required)
        #[arg(long)]
        verify: Option<VerifyMode>,

        /// PEM file of trusted CA certificates
        #[arg(long)]
        ca: Option<PathBuf>,

        #[arg(short, long, default_value = "ping")]
        message: String,
    },

    /// Accept TLS sessions and echo whatever clients send
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:4433")]
        listen: String,

        /// JSON session profile
        #[arg(short, long, env = "SEALKIT_PROFILE", conflicts_with_all = ["cert", "key"])]
        profile: Option<PathBuf>,

        /// PEM certificate chain (self-signed for localhost when omitted)
        #[arg(long, requires = "key")]
        cert: Option<PathBuf>,

        /// PEM private key
        #[arg(long, requires = "cert")]
        key: Option<PathBuf>,

        /// Stop after the first session
        #[arg(long)]
        once: bool,
    },

    /// Show version
    Version,
}

#[derive(Subcommand, Debug)]
enum CipherOp {
    Encrypt(CipherArgs),
    Decrypt(CipherArgs),
}

#[derive(clap::Args, Debug)]
struct CipherArgs {
    /// Use triple-DES (16 or 24 byte key)
    #[arg(long)]
    triple: bool,

    /// Block mode (CBC or ECB)
    #[arg(long, default_value = "CBC")]
    mode: String,

    /// Key, hex encoded
    #[arg(long)]
    key: String,

    /// IV, hex encoded (ignored for ECB)
    #[arg(long, default_value = "0000000000000000")]
    iv: String,

    /// Data, hex encoded
    #[arg(long)]
    data: String,
}

fn main() -> Result<()> {
    sealkit_common::init_tracing();

    let args = Args::parse();

    match args.command {
        Command::SelfTest => run_self_test(),
        Command::Keygen { curve } => {
            let pool = Arc::new(EntropyPool::new());
            let rng = generator(&pool, b"sealkit-cli keygen")?;
            let mut ctx = EcKeyContext::new();
            ctx.generate_key(curve, rng.as_ref())?;
            println!("curve:   {curve}");
            println!("public:  {}", ctx.public_key()?);
            println!("private: {}", ctx.private_key()?);
            Ok(())
        }
        Command::PublicKey { key } => {
            let ctx = load_key(&key)?;
            println!("{}", ctx.public_key()?);
            Ok(())
        }
        Command::Sign { key, digest, message } => {
            let ctx = load_key(&key)?;
            let digest = match (digest, message) {
                (Some(hex), _) => from_hex(&hex)?,
                (None, Some(text)) => Sha256::digest(text.as_bytes()).to_vec(),
                (None, None) => bail!("either --digest or --message is required"),
            };
            let pool = Arc::new(EntropyPool::new());
            let rng = generator(&pool, b"sealkit-cli sign")?;
            println!("{}", ctx.sign(&digest, rng.as_ref())?);
            Ok(())
        }
        Command::Cipher { op } => {
            let (encrypt, args) = match op {
                CipherOp::Encrypt(args) => (true, args),
                CipherOp::Decrypt(args) => (false, args),
            };
            let key = from_hex(&args.key)?;
            let iv = from_hex(&args.iv)?;
            let data = from_hex(&args.data)?;
            let out = match (args.triple, encrypt) {
                (false, true) => Des::encrypt(&args.mode, &key, &data, &iv)?,
                (false, false) => Des::decrypt(&args.mode, &key, &data, &iv)?,
                (true, true) => TripleDes::encrypt(&args.mode, &key, &data, &iv)?,
                (true, false) => TripleDes::decrypt(&args.mode, &key, &data, &iv)?,
            };
            println!("{}", to_upper_hex(&out));
            Ok(())
        }
        Command::Base64 { decode, input } => {
            let input = match input {
                Some(text) => text,
                None => {
                    let mut buf = String::new();
                    io::stdin().read_to_string(&mut buf)?;
                    buf
                }
            };
            if decode {
                let bytes = base64_decode(&input)?;
                println!("{}", String::from_utf8_lossy(&bytes));
            } else {
                println!("{}", base64_encode(input.trim_end_matches('\n').as_bytes()));
            }
            Ok(())
        }
        Command::Connect {
            addr,
            profile,
            hostname,
            verify,
            ca,
            message,
        } => connect(&addr, profile, hostname, verify, ca, &message),
        Command::Serve {
            listen,
            profile,
            cert,
            key,
            once,
        } => serve(&listen, profile, cert.zip(key), once),
        Command::Version => {
            println!("sealkit {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// The pool must outlive the generator; it only keeps a weak reference.
fn generator(pool: &Arc<EntropyPool>, personalization: &[u8]) -> Result<Arc<dyn RandomByteSource>> {
    let drbg: Arc<dyn RandomByteSource> = Arc::new(Drbg::new(pool, Some(personalization))?);
    Ok(drbg)
}

fn load_key(path: &Path) -> Result<EcKeyContext> {
    let pem = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut ctx = EcKeyContext::new();
    ctx.load_pem(&pem)?;
    Ok(ctx)
}

fn run_self_test() -> Result<()> {
    if !self_test() {
        bail!("drbg: FAILED");
    }
    println!("drbg: ok");

    // FIPS 81 / NBS single-DES vector.
    let key = from_hex("0123456789ABCDEF")?;
    let plain = from_hex("4E6F772069732074")?;
    let cipher = Des::encrypt("ECB", &key, &plain, &[])?;
    if to_upper_hex(&cipher) != "3FA40E8A984D4815" {
        bail!("des: FAILED");
    }
    println!("des: ok");

    let pool = Arc::new(EntropyPool::new());
    let rng = generator(&pool, b"sealkit-cli self-test")?;
    let digest = Sha256::digest(b"sealkit self-test");
    for curve in Curve::ALL {
        let mut ctx = EcKeyContext::new();
        ctx.generate_key(curve, rng.as_ref())?;
        let signature = ctx.sign(&digest, rng.as_ref())?;
        if !ctx.verify(&digest, &signature)? {
            bail!("ecdsa {curve}: FAILED");
        }
    }
    println!("ecdsa: ok");
    Ok(())
}

fn connect(
    addr: &str,
    profile: Option<PathBuf>,
    hostname: Option<String>,
    verify: Option<VerifyMode>,
    ca: Option<PathBuf>,
    message: &str,
) -> Result<()> {
    let pool = Arc::new(EntropyPool::new());
    let mut session = TlsSession::new();

    let (rng, read_buffer) = match profile {
        Some(path) => {
            let profile = SessionProfile::load(&path)?;
            if profile.endpoint != Role::Client {
                bail!("{} is not a client profile", path.display());
            }
            profile.configure(&mut session)?;
            (profile.build_rng(&pool)?, profile.read_buffer)
        }
        None => {
            session.set_endpoint(Endpoint::Client)?;
            session.set_verify_mode(VerifyMode::Optional)?;
            (Drbg::new(&pool, Some(b"sealkit-cli connect".as_slice()))?, DEFAULT_READ_BUFFER)
        }
    };

    if let Some(mode) = verify {
        session.set_verify_mode(mode)?;
    }
    if let Some(host) = &hostname {
        session.set_hostname(host)?;
    }
    if let Some(path) = &ca {
        let pem = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        session.set_ca_chain(&pem)?;
    }

    session.set_rng(Arc::new(rng))?;
    let stream = TcpStream::connect(addr).with_context(|| format!("connecting to {addr}"))?;
    session.set_transport(stream)?;
    session.handshake()?;

    info!(
        addr,
        version = ?session.negotiated_protocol_version(),
        suite = ?session.negotiated_cipher_suite(),
        "session established"
    );
    println!("verify: {:?}", session.verify_result());

    session.write(message.as_bytes())?;
    match session.read(read_buffer)? {
        Some(reply) => println!("{}", String::from_utf8_lossy(&reply)),
        None => warn!("peer closed before replying"),
    }
    session.close_notify()?;
    Ok(())
}

/// What every accepted connection is configured from.
enum ServerSetup {
    Profile(SessionProfile),
    Identity { cert_pem: String, key_pem: String },
}

impl ServerSetup {
    fn session(&self, rng: &Arc<dyn RandomByteSource>) -> Result<(TlsSession, usize)> {
        let mut session = TlsSession::new();
        let read_buffer = match self {
            Self::Profile(profile) => {
                profile.configure(&mut session)?;
                profile.read_buffer
            }
            Self::Identity { cert_pem, key_pem } => {
                session.set_endpoint(Endpoint::Server)?;
                session.set_verify_mode(VerifyMode::None)?;
                session.set_own_cert(cert_pem, key_pem)?;
                DEFAULT_READ_BUFFER
            }
        };
        session.set_rng(Arc::clone(rng))?;
        Ok((session, read_buffer))
    }
}

fn serve(listen: &str, profile: Option<PathBuf>, identity: Option<(PathBuf, PathBuf)>, once: bool) -> Result<()> {
    let pool = Arc::new(EntropyPool::new());
    let (setup, rng): (ServerSetup, Arc<dyn RandomByteSource>) = match (profile, identity) {
        (Some(path), _) => {
            let profile = SessionProfile::load(&path)?;
            if profile.endpoint != Role::Server {
                bail!("{} is not a server profile", path.display());
            }
            let rng: Arc<dyn RandomByteSource> = Arc::new(profile.build_rng(&pool)?);
            (ServerSetup::Profile(profile), rng)
        }
        (None, Some((cert, key))) => {
            let cert_pem = fs::read_to_string(&cert).with_context(|| format!("reading {}", cert.display()))?;
            let key_pem = fs::read_to_string(&key).with_context(|| format!("reading {}", key.display()))?;
            let rng: Arc<dyn RandomByteSource> = Arc::new(Drbg::new(&pool, Some(b"sealkit-cli serve".as_slice()))?);
            (ServerSetup::Identity { cert_pem, key_pem }, rng)
        }
        (None, None) => {
            let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
                .context("generating self-signed certificate")?;
            warn!("no certificate given, serving a self-signed one for localhost");
            let rng: Arc<dyn RandomByteSource> = Arc::new(Drbg::new(&pool, Some(b"sealkit-cli serve".as_slice()))?);
            let setup = ServerSetup::Identity {
                cert_pem: certified.cert.pem(),
                key_pem: certified.key_pair.serialize_pem(),
            };
            (setup, rng)
        }
    };

    let listener = TcpListener::bind(listen).with_context(|| format!("binding {listen}"))?;
    info!(addr = %listener.local_addr()?, "listening");

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_default();
        match echo(&setup, &rng, stream) {
            Ok(bytes) => info!(%peer, bytes, "session finished"),
            Err(e) => warn!(%peer, error = %e, "session failed"),
        }
        if once {
            break;
        }
    }
    Ok(())
}

fn echo(setup: &ServerSetup, rng: &Arc<dyn RandomByteSource>, stream: TcpStream) -> Result<usize> {
    let (mut session, read_buffer) = setup.session(rng)?;
    session.set_transport(stream)?;
    session.handshake()?;
    info!(verify = ?session.verify_result(), "client connected");

    let mut total = 0;
    while let Some(data) = session.read(read_buffer)? {
        total += session.write(&data)?;
    }
    if let Err(e) = session.close_notify() {
        warn!(error = %e, "close notify failed");
    }
    Ok(total)
}
