use std::io::{BufRead, BufReader, Read, Write};
use std::net::{self, TcpStream};
use std::path::Path;
use std::thread;
use std::time::Duration;

use log::{debug, warn};
use ssh2::ExtendedData;

use crate::config::RemoteConfig;
use crate::env_file::Role;
use crate::{Error, Result};

pub struct Session {
    ssh: ssh2::Session,
    _stream: TcpStream,
}

impl Session {
    /// Connects and authenticates with `key`. sshd comes up, and cloud-init
    /// installs the key, a little after EC2 reports the instance as running, so
    /// the whole connect, handshake and auth sequence is retried.
    pub(crate) fn connect<A: net::ToSocketAddrs>(
        addr: A,
        user: &str,
        key: &Path,
        attempts: u32,
        delay: Duration,
    ) -> Result<Self> {
        let mut i = 1;
        loop {
            match Self::try_connect(&addr, user, key) {
                Ok(s) => return Ok(s),
                Err(e) if i < attempts => {
                    warn!("ssh not ready yet ({}), retrying", e);
                    i += 1;
                    thread::sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn try_connect<A: net::ToSocketAddrs>(addr: &A, user: &str, key: &Path) -> Result<Self> {
        let tcp = TcpStream::connect(addr)?;
        let mut sess = ssh2::Session::new()?;
        sess.set_tcp_stream(tcp.try_clone()?);
        sess.handshake()?;
        sess.userauth_pubkey_file(user, None, key, None)?;

        Ok(Session {
            ssh: sess,
            _stream: tcp,
        })
    }

    pub fn cmd(&mut self, cmd: &str) -> Result<String> {
        let mut channel = self.ssh.channel_session()?;
        channel.exec(cmd)?;
        let mut s = String::new();
        channel.read_to_string(&mut s)?;
        channel.wait_close()?;
        debug!("`{}` exited with {}", cmd, channel.exit_status()?);
        Ok(s)
    }

    /// Feeds `commands` to a single interactive shell and copies its output
    /// to `out` until `sentinel` is printed. Exit statuses are not checked.
    pub fn run_script<W: Write>(
        &mut self,
        commands: &[String],
        sentinel: &str,
        out: W,
    ) -> Result<()> {
        let mut channel = self.ssh.channel_session()?;
        channel.handle_extended_data(ExtendedData::Merge)?;
        channel.shell()?;

        exchange(&mut channel, commands, sentinel, out)?;

        channel.send_eof()?;
        channel.close()?;
        channel.wait_close()?;
        Ok(())
    }
}

/// Writes the script to a shell's input, then copies its output to `out` until
/// the sentinel line.
pub fn exchange<S: Read + Write, W: Write>(
    shell: &mut S,
    commands: &[String],
    sentinel: &str,
    out: W,
) -> Result<usize> {
    shell.write_all(script_input(commands, sentinel).as_bytes())?;
    shell.flush()?;
    pump_until_sentinel(BufReader::new(shell), sentinel, out)
}

/// The bytes written to the remote shell's stdin.
pub fn script_input(commands: &[String], sentinel: &str) -> String {
    let mut input = String::new();
    for cmd in commands {
        input.push_str(cmd);
        input.push('\n');
    }
    input.push_str(&format!("echo {}\n", sentinel));
    input
}

/// Copies lines from `reader` to `out` until one equals `sentinel`. Returns the
/// number of lines copied.
pub fn pump_until_sentinel<R: BufRead, W: Write>(
    reader: R,
    sentinel: &str,
    mut out: W,
) -> Result<usize> {
    let mut copied = 0;
    for line in reader.lines() {
        let line = line?;
        if line.trim_end() == sentinel {
            return Ok(copied);
        }
        writeln!(out, "{}", line)?;
        copied += 1;
    }
    Err(Error::SentinelMissing(sentinel.to_string()))
}

/// The commands run on a machine: the role exports followed by either the
/// fetched script or the configured command list.
pub fn setup_commands(remote: &RemoteConfig, role: Role, master_ip: Option<&str>) -> Vec<String> {
    let mut cmds = vec!["cd ~".to_string(), format!("export ROLE={}", role)];
    if let Some(ip) = master_ip {
        cmds.push(format!("export MASTER_IP={}", ip));
    }
    match &remote.script_url {
        Some(url) => {
            let mut run = format!("sudo -E ./setup.sh {}", role);
            if let Some(ip) = master_ip {
                run.push(' ');
                run.push_str(ip);
            }
            cmds.push(format!("curl -fsSL {} -o setup.sh", url));
            cmds.push("chmod +x setup.sh".to_string());
            cmds.push(run);
        }
        None => cmds.extend(remote.commands.iter().cloned()),
    }
    cmds
}
