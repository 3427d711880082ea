use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use provision::{ec2, instance, remote_setup, Config, EnvFile, ProvisionBuilder, Topology};

/// Launch standalone or clustered database servers on EC2.
#[derive(Parser)]
#[clap(version)]
struct Opts {
    /// TOML file overriding the default deployment settings
    #[clap(short, long, env = "PROVISION_CONFIG")]
    config: Option<PathBuf>,
    #[clap(short, long, value_enum, default_value = "cluster")]
    topology: Topology,
    /// Terminate every running instance and exit
    #[clap(long, conflicts_with_all = &["skip-setup", "setup-only"])]
    kill: bool,
    /// Stop after writing the env file
    #[clap(long, conflicts_with = "setup-only")]
    skip_setup: bool,
    /// Only run the remote setup script against the machines in the env file
    #[clap(long)]
    setup_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    if env::var_os("RUST_LOG").is_none() {
        env::set_var("RUST_LOG", "provision=info");
    }
    pretty_env_logger::init();

    let opts = Opts::parse();
    let config = Config::load(opts.config.as_deref()).context("failed to load configuration")?;

    if opts.setup_only {
        let env = EnvFile::read(&config.env_file)
            .with_context(|| format!("failed to read {}", config.env_file.display()))?;
        remote_setup(&env, &config).await?;
        return Ok(());
    }

    let ec2 = ec2::connect(&config.region, config.assume_role.as_deref())?;

    if opts.kill {
        for id in instance::terminate_running(&ec2).await? {
            println!("{}", id);
        }
        return Ok(());
    }

    let deployment = ProvisionBuilder::for_topology(&config, opts.topology)?
        .run(&ec2, &config)
        .await?;

    if !opts.skip_setup {
        remote_setup(&deployment.env, &config).await?;
    }

    let key = config.private_key_path();
    for machine in &deployment.machines {
        info!(
            "{} {} started ({})",
            machine.role, machine.instance_id, machine.instance_type
        );
        println!(
            "ssh -i {} {}@{}",
            key.display(),
            config.remote.user,
            machine.public_ip
        );
    }
    Ok(())
}
