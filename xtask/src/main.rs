use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Parser)]
enum Cmd {
    /// Build the cpuprof collector object
    BuildEbpf {
        #[arg(long, default_value = "bpfel-unknown-none")]
        target: String,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Cmd::BuildEbpf { target } => build_ebpf(&target)?,
    }

    Ok(())
}

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

fn build_ebpf(target: &str) -> Result<()> {
    let root = workspace_root();
    let target_dir = root.join("target");

    // cpuprof-ebpf sits outside the workspace (no_std, its own profiles), so it
    // is built through its manifest and pointed at the shared target dir.
    // Debug builds pull in formatting code the BPF linker rejects: always release.
    let mut cmd = Command::new("cargo");
    cmd.current_dir(root.join("cpuprof-ebpf"))
        .arg("+nightly")
        .arg("build")
        .arg("--manifest-path")
        .arg(root.join("cpuprof-ebpf/Cargo.toml"))
        .arg("--target")
        .arg(target)
        .arg("--target-dir")
        .arg(&target_dir)
        .arg("-Z")
        .arg("build-std=core")
        .arg("--release");

    let status = cmd.status().context("Failed to run cargo for cpuprof-ebpf")?;

    if !status.success() {
        anyhow::bail!("Failed to build eBPF program");
    }

    let object = target_dir.join(target).join("release").join("cpuprof");
    println!("✓ Collector built successfully");
    println!("  Object: {}", object.display());
    println!("  Run with: sudo cpuprof --object {}", object.display());

    Ok(())
}
