//! Generates a Dilithium3 keypair for a mesh participant and writes its
//! public/secret halves to disk, the way a node operator would provision a
//! new identity before its first `Network::new` call.
//!
//! Usage:
//!   cargo run --bin meshline-keygen -- --name alice --output ./keys/

use clap::Parser;
use meshline::Keypair;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "meshline-keygen", version, about = "meshline peer keypair generator")]
struct Args {
    /// Identity name (used only for the output filenames).
    #[arg(short, long)]
    name: String,

    /// Output directory for the key files.
    #[arg(short, long, default_value = ".")]
    output: PathBuf,
}

fn main() {
    let args = Args::parse();
    fs::create_dir_all(&args.output).expect("failed to create output directory");

    let keypair = Keypair::generate();

    let secret_path = args.output.join(format!("{}.secret", args.name));
    fs::write(&secret_path, keypair.secret_bytes()).expect("failed to write secret key");

    let public_path = args.output.join(format!("{}.public", args.name));
    fs::write(&public_path, &keypair.public.0).expect("failed to write public key");

    println!("identity: {}", args.name);
    println!("public key  ({} bytes): {}", keypair.public.0.len(), public_path.display());
    println!("secret key  ({} bytes): {}", keypair.secret_bytes().len(), secret_path.display());
    println!("peer id: {}", hex::encode(&keypair.public.0[..16.min(keypair.public.0.len())]));
}
