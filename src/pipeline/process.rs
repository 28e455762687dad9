// Process pair spawning, grouping and teardown
//
// Process A encodes raw PCM from the session input pipe into the configured
// container; process B decodes that container back to raw PCM on the session
// output pipe. A's stdout is handed directly to B as stdin, so the
// intermediate pipe never has a parent-side handle to leak. Both children are
// placed in one process group so forced termination takes the whole chain
// down in a single call, leaving no orphans.

use std::fs::File;
use std::io;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::command;
use super::config::PipelineConfig;
use super::pipe::diagnostic_pipe;
use crate::error::{PipelineError, Result};

const REAP_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Parent-side endpoints of a spawned chain.
pub struct ChainIo {
    /// Write end feeding process A raw s16le PCM
    pub input: ChildStdin,
    /// Read end carrying decoded s16le PCM out of process B
    pub output: ChildStdout,
    /// Read end of the merged diagnostic stream of both processes
    pub diagnostics: File,
}

/// The two live transcoder processes of one session.
pub struct TranscodeChain {
    encoder: Child,
    decoder: Child,
    #[cfg(unix)]
    pgid: i32,
}

impl TranscodeChain {
    /// Spawn the encode and decode processes chained via their stdio.
    ///
    /// If the encoder comes up but the decoder fails to spawn, the encoder is
    /// force-terminated and reaped before the error is returned; no partially
    /// running chain survives a failed spawn.
    pub fn spawn(config: &PipelineConfig) -> Result<(Self, ChainIo)> {
        let diag = diagnostic_pipe().map_err(PipelineError::PipeCreation)?;

        let encoder_args = command::encoder_args(config);
        let decoder_args = command::decoder_args(config);
        debug!(
            "encoder command: {} {}",
            config.ffmpeg_path.display(),
            encoder_args.join(" ")
        );
        debug!(
            "decoder command: {} {}",
            config.decoder_executable().display(),
            decoder_args.join(" ")
        );

        let mut encoder_cmd = Command::new(&config.ffmpeg_path);
        encoder_cmd
            .args(&encoder_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(diag.writer_a);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // New process group led by the encoder; the decoder joins it.
            encoder_cmd.process_group(0);
        }

        let mut encoder = encoder_cmd.spawn().map_err(|source| PipelineError::ProcessLaunch {
            stage: "encoder",
            source,
        })?;
        #[cfg(unix)]
        let pgid = encoder.id() as i32;

        let input = match encoder.stdin.take() {
            Some(stdin) => stdin,
            None => {
                kill_and_reap(&mut encoder);
                return Err(PipelineError::ProcessLaunch {
                    stage: "encoder",
                    source: io::Error::other("encoder stdin handle missing"),
                });
            }
        };
        let intermediate = match encoder.stdout.take() {
            Some(stdout) => stdout,
            None => {
                kill_and_reap(&mut encoder);
                return Err(PipelineError::ProcessLaunch {
                    stage: "encoder",
                    source: io::Error::other("encoder stdout handle missing"),
                });
            }
        };

        let mut decoder_cmd = Command::new(config.decoder_executable());
        decoder_cmd
            .args(&decoder_args)
            .stdin(Stdio::from(intermediate))
            .stdout(Stdio::piped())
            .stderr(diag.writer_b);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            decoder_cmd.process_group(pgid);
        }

        let mut decoder = match decoder_cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                kill_and_reap(&mut encoder);
                return Err(PipelineError::ProcessLaunch {
                    stage: "decoder",
                    source,
                });
            }
        };
        let output = match decoder.stdout.take() {
            Some(stdout) => stdout,
            None => {
                kill_and_reap(&mut decoder);
                kill_and_reap(&mut encoder);
                return Err(PipelineError::ProcessLaunch {
                    stage: "decoder",
                    source: io::Error::other("decoder stdout handle missing"),
                });
            }
        };

        // All child-destined handles are now either transferred (stderr
        // Stdios, intermediate pipe) or taken; nothing is left to leak.
        Ok((
            Self {
                encoder,
                decoder,
                #[cfg(unix)]
                pgid,
            },
            ChainIo {
                input,
                output,
                diagnostics: diag.reader,
            },
        ))
    }

    /// Wait for both processes to exit within `timeout`, then force-kill any
    /// survivor via the process group. Returns true if force termination was
    /// needed.
    pub fn shutdown(mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let encoder_exited = wait_until(&mut self.encoder, deadline);
        let decoder_exited = wait_until(&mut self.decoder, deadline);
        if encoder_exited && decoder_exited {
            return false;
        }

        warn!("transcoder chain did not exit gracefully, forcing termination");
        self.force_kill();
        true
    }

    /// Kill the whole chain immediately and reap both children.
    pub fn force_kill(&mut self) {
        #[cfg(unix)]
        unsafe {
            libc::killpg(self.pgid, libc::SIGKILL);
        }
        kill_and_reap(&mut self.encoder);
        kill_and_reap(&mut self.decoder);
    }

    /// True while both processes are still running.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.encoder.try_wait(), Ok(None)) && matches!(self.decoder.try_wait(), Ok(None))
    }
}

fn kill_and_reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn wait_until(child: &mut Child, deadline: Instant) -> bool {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(?status, pid = child.id(), "transcoder process exited");
                return true;
            }
            Ok(None) => {}
            // The child cannot be observed anymore; nothing left to wait for.
            Err(error) => {
                warn!(%error, pid = child.id(), "failed to poll transcoder process");
                return true;
            }
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(REAP_POLL_INTERVAL);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn stub_executable(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("transcoder-stub");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh\n{}", body).unwrap();
        let mut perms = file.metadata().unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[test]
    fn test_spawn_fails_for_missing_executable() {
        let config = PipelineConfig {
            ffmpeg_path: PathBuf::from("/nonexistent/transcoder"),
            ..Default::default()
        };
        match TranscodeChain::spawn(&config) {
            Err(PipelineError::ProcessLaunch { stage, .. }) => assert_eq!(stage, "encoder"),
            other => panic!("expected encoder launch failure, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_decoder_spawn_failure_reaps_encoder() {
        let dir = TempDir::new().unwrap();
        // Loops forever even after stdin EOF, so only the kill removes it.
        let encoder_path = stub_executable(&dir, "while :; do sleep 1; done");
        let config = PipelineConfig {
            ffmpeg_path: encoder_path.clone(),
            decoder_path: Some(PathBuf::from("/nonexistent/transcoder")),
            ..Default::default()
        };
        match TranscodeChain::spawn(&config) {
            Err(PipelineError::ProcessLaunch { stage, .. }) => assert_eq!(stage, "decoder"),
            other => panic!("expected decoder launch failure, got {:?}", other.map(|_| ())),
        }

        // The half-started encoder must be killed and reaped before the
        // error surfaces, leaving no live process behind.
        let leftover = Command::new("pgrep")
            .arg("-f")
            .arg(encoder_path.as_os_str())
            .output()
            .unwrap();
        assert!(
            !leftover.status.success(),
            "encoder still running: {}",
            String::from_utf8_lossy(&leftover.stdout)
        );
    }

    #[test]
    fn test_graceful_shutdown_after_input_closes() {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfig {
            ffmpeg_path: stub_executable(&dir, "exec cat"),
            ..Default::default()
        };
        let (mut chain, io) = TranscodeChain::spawn(&config).unwrap();
        assert!(chain.is_alive(), "freshly spawned chain should be running");

        // Closing the session input cascades EOF through the chain.
        drop(io.input);
        let forced = chain.shutdown(Duration::from_secs(2));
        assert!(!forced, "cat chain should drain without force kill");
    }

    #[test]
    fn test_hung_chain_is_force_killed_within_bound() {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfig {
            // Never reads stdin, never exits on EOF.
            ffmpeg_path: stub_executable(&dir, "exec sleep 60"),
            ..Default::default()
        };
        let (chain, io) = TranscodeChain::spawn(&config).unwrap();
        drop(io.input);

        let started = Instant::now();
        let forced = chain.shutdown(Duration::from_millis(300));
        assert!(forced, "sleeping chain must require force kill");
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "shutdown took {:?}",
            started.elapsed()
        );
    }
}
