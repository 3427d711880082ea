use std::io;

use log::info;

mod error;

pub mod config;
pub mod ec2;
pub mod env_file;
pub mod instance;
pub mod keypair;
pub mod security_group;
pub mod ssh;

#[cfg(test)]
mod fake;

pub use config::Config;
pub use env_file::{EnvFile, Role};
pub use error::{Error, Result};

use ec2::{Ec2Api, LaunchSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Topology {
    /// A single database server.
    Standalone,
    /// One master and `cluster.slaves` slaves.
    Cluster,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Machine {
    pub role: Role,
    pub instance_id: String,
    pub instance_type: String,
    pub public_ip: String,
}

pub struct MachineSetup {
    instance_type: String,
    ami: String,
    user_data: Option<String>,
}

impl MachineSetup {
    pub fn new(instance_type: &str, ami: &str) -> Self {
        MachineSetup {
            instance_type: instance_type.to_string(),
            ami: ami.to_string(),
            user_data: None,
        }
    }

    /// Script run by the instance on first boot.
    pub fn user_data(mut self, script: Option<String>) -> Self {
        self.user_data = script;
        self
    }
}

/// The result of a provisioning run.
pub struct Deployment {
    pub machines: Vec<Machine>,
    pub env: EnvFile,
}

#[derive(Default)]
pub struct ProvisionBuilder {
    machines: Vec<(Role, MachineSetup)>,
}

impl ProvisionBuilder {
    /// Standard layout for `topology`, built from `config`.
    pub fn for_topology(config: &Config, topology: Topology) -> Result<Self> {
        let user_data = config.user_data()?;
        let mut b = ProvisionBuilder::default();
        match topology {
            Topology::Standalone => {
                let setup = MachineSetup::new(&config.standalone.instance_type, &config.image_id)
                    .user_data(user_data);
                b.add_machine(Role::Standalone, setup);
            }
            Topology::Cluster => {
                let setup = |ud: Option<String>| {
                    MachineSetup::new(&config.cluster.instance_type, &config.image_id)
                        .user_data(ud)
                };
                b.add_machine(Role::Master, setup(user_data.clone()));
                for n in 0..config.cluster.slaves {
                    b.add_machine(Role::Slave(n), setup(user_data.clone()));
                }
            }
        }
        Ok(b)
    }

    /// Adds a machine for `role`. A role added twice keeps the latest setup.
    pub fn add_machine(&mut self, role: Role, setup: MachineSetup) {
        match self.machines.iter_mut().find(|(r, _)| *r == role) {
            Some(entry) => entry.1 = setup,
            None => self.machines.push((role, setup)),
        }
    }

    /// Creates the key pair, security group and instances, waits for every
    /// instance to run and writes their addresses to the env file.
    ///
    /// All instances are requested before any of them is waited on.
    pub async fn run<A: Ec2Api + ?Sized>(self, api: &A, config: &Config) -> Result<Deployment> {
        let key_path = config.private_key_path();
        keypair::ensure_key_pair(api, &config.key_name, &key_path).await?;

        let sg = &config.security_group;
        let group_id =
            security_group::ensure_security_group(api, &sg.name, &sg.description, &sg.ingress)
                .await?;

        let mut launched = Vec::new();
        for (role, setup) in self.machines {
            let spec = LaunchSpec {
                name: instance_name(role),
                image_id: setup.ami,
                instance_type: setup.instance_type.clone(),
                security_group_id: group_id.clone(),
                key_name: config.key_name.clone(),
                user_data: setup.user_data,
            };
            let id = instance::launch(api, &spec).await?;
            launched.push((role, id, setup.instance_type));
        }

        let mut env = EnvFile::new(&key_path);
        let mut machines = Vec::new();
        for (role, instance_id, instance_type) in launched {
            instance::wait_until_running(api, &instance_id, config.poll_interval()).await?;
            let public_ip = instance::public_ip(api, &instance_id).await?;
            env.insert(role, &public_ip);
            machines.push(Machine {
                role,
                instance_id,
                instance_type,
                public_ip,
            });
        }

        env.write(&config.env_file)?;
        info!(
            "wrote instance IPs and private key filename to {}",
            config.env_file.display()
        );
        Ok(Deployment { machines, env })
    }
}

fn instance_name(role: Role) -> String {
    match role {
        Role::Standalone => "standalone".to_string(),
        Role::Master => "master".to_string(),
        Role::Slave(n) => format!("slave-{}", n),
    }
}

/// SSHes into every machine listed in `env`, one after the other, and runs the
/// setup commands on it.
pub async fn remote_setup(env: &EnvFile, config: &Config) -> Result<()> {
    let remote = &config.remote;
    if remote.script_url.is_none() && remote.commands.is_empty() {
        info!("no setup commands configured, skipping remote setup");
        return Ok(());
    }
    let key = env
        .private_key()
        .ok_or(Error::EnvEntryMissing("PRIVATE_KEY_FILE"))?
        .to_path_buf();
    let master_ip = env.get(Role::Master).map(str::to_string);

    for (role, ip) in env.addresses() {
        let role = *role;
        let commands = ssh::setup_commands(
            remote,
            role,
            match role {
                Role::Slave(_) => master_ip.as_deref(),
                _ => None,
            },
        );
        let addr = (ip.clone(), 22u16);
        let key = key.clone();
        let remote = remote.clone();
        info!("running setup script on {} ({})", role, ip);
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut sess = ssh::Session::connect(
                addr,
                &remote.user,
                &key,
                remote.connect_attempts,
                remote.connect_delay(),
            )?;
            let hostname = sess.cmd("hostname")?;
            info!("connected to {}", hostname.trim());
            sess.run_script(&commands, &remote.sentinel, io::stdout())
        })
        .await??;
        info!("setup finished on {}", role);
    }
    Ok(())
}
