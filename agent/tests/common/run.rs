use anyhow::Context;
use assert_cmd::cargo::{CargoError, CommandCargoExt};
use std::{
    io::{Read, Write},
    path::Path,
    process::{Child, Command, Output, Stdio},
    thread,
};

/// Constructs a `Command` that executes the agent binary.
///
/// This does NOT call `cargo run`, see [`assert_cmd::Command::cargo_bin`].
pub fn command_run_agent(binary: &str, bin_args: &[&str]) -> Result<Command, CargoError> {
    let mut cmd = Command::cargo_bin(binary)?;
    cmd.args(bin_args);
    // the default filter of the agent is used
    cmd.env_remove("RUST_LOG").env_remove("FPSMETER_CONFIG");
    Ok(cmd)
}

/// Executes the agent with the given arguments, in `workdir`, and duplicates its output
/// to the current stdout/stderr and two buffers.
///
/// The buffers are returned in an [`Output`].
pub fn run_agent_tee(binary: &str, bin_args: &[&str], workdir: &Path) -> anyhow::Result<Output> {
    let mut cmd = command_run_agent(binary, bin_args)?;
    let child = cmd
        .current_dir(workdir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("could not spawn process {cmd:?}"))?;
    let mut child = ChildGuard(Some(child));

    let child_stdout = child.stdout_mut().take().context("could not attach to child stdout")?;
    let child_stderr = child.stderr_mut().take().context("could not attach to child stderr")?;

    fn tee(mut stream: impl Read, a: &mut impl Write, b: &mut impl Write) -> std::io::Result<()> {
        let mut buf = [0u8; 256];
        loop {
            let n_read = stream.read(&mut buf)?;
            if n_read == 0 {
                break;
            }
            let buf = &buf[..n_read];
            a.write_all(buf)?;
            b.write_all(buf)?;
        }
        Ok(())
    }

    let stdout_thread = thread::spawn(move || {
        let mut stdout_buf = Vec::with_capacity(512);
        tee(child_stdout, &mut stdout_buf, &mut std::io::stdout().lock())?;
        anyhow::Ok(stdout_buf)
    });
    let stderr_thread = thread::spawn(move || {
        let mut stderr_buf = Vec::with_capacity(512);
        tee(child_stderr, &mut stderr_buf, &mut std::io::stderr().lock())?;
        anyhow::Ok(stderr_buf)
    });

    let stdout = stdout_thread.join().unwrap()?;
    let stderr = stderr_thread.join().unwrap()?;

    let status = child.wait()?;
    Ok(Output { status, stdout, stderr })
}

/// A wrapper around a child process that kills the child on drop.
struct ChildGuard(Option<Child>);

impl ChildGuard {
    fn child(&mut self) -> &mut Child {
        self.0.as_mut().unwrap()
    }

    fn stdout_mut(&mut self) -> &mut Option<std::process::ChildStdout> {
        &mut self.child().stdout
    }

    fn stderr_mut(&mut self) -> &mut Option<std::process::ChildStderr> {
        &mut self.child().stderr
    }

    fn wait(&mut self) -> std::io::Result<std::process::ExitStatus> {
        self.child().wait()
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Some(mut child) = self.0.take() {
            if let Ok(None) = child.try_wait() {
                if let Err(e) = child.kill() {
                    println!("ERROR: failed to kill child {} on drop: {e}", child.id());
                }
            }
        }
    }
}
