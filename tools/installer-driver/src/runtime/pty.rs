//! Production pty backend built on `portable-pty`.
//!
//! A reader thread pumps the master side into a channel so that reads can
//! be bounded by a deadline. The slave handle is dropped right after the
//! spawn so the master reports end of stream once the child exits.

use super::{PtyChannel, PtySpawner, ReadEvent, SpawnRequest};
use crate::errors::DriverError;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtyPair, PtySize};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

const READ_CHUNK_BYTES: usize = 4096;

#[derive(Debug, Clone, Copy)]
pub struct PortablePtySpawner {
    pub rows: u16,
    pub cols: u16,
}

impl Default for PortablePtySpawner {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

impl PtySpawner for PortablePtySpawner {
    fn spawn(&self, request: &SpawnRequest) -> Result<Box<dyn PtyChannel>, DriverError> {
        check_executable(&request.program, &request.cwd)?;

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: self.rows,
                cols: self.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| DriverError::Spawn(format!("openpty failed: {e}")))?;
        let PtyPair { slave, master } = pair;

        let mut cmd = CommandBuilder::new(&request.program);
        cmd.args(&request.args);
        cmd.cwd(&request.cwd);
        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        let child = slave
            .spawn_command(cmd)
            .map_err(|e| DriverError::Spawn(format!("{}: {e}", request.program.display())))?;
        drop(slave);

        let reader = master
            .try_clone_reader()
            .map_err(|e| DriverError::Spawn(format!("pty reader unavailable: {e}")))?;
        let writer = master
            .take_writer()
            .map_err(|e| DriverError::Spawn(format!("pty writer unavailable: {e}")))?;

        let (tx, rx) = channel();
        thread::spawn(move || pump_output(reader, tx));

        Ok(Box::new(PortablePtyChannel {
            _master: master,
            writer,
            child,
            output: rx,
            exit_code: None,
        }))
    }
}

enum Pumped {
    Data(Vec<u8>),
    Closed,
}

fn pump_output(mut reader: Box<dyn Read + Send>, tx: Sender<Pumped>) {
    let mut buf = [0u8; READ_CHUNK_BYTES];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(Pumped::Data(buf[..n].to_vec())).is_err() {
                    return;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            // Linux reports EIO on the master once the last slave fd closes.
            Err(_) => break,
        }
    }
    let _ = tx.send(Pumped::Closed);
}

/// Surfaces missing files and missing execute bits as plain I/O reasons
/// before a pty is allocated. Bare program names are left to PATH lookup;
/// relative paths are taken from the child's working directory.
fn check_executable(program: &Path, cwd: &Path) -> Result<(), DriverError> {
    if program.components().count() < 2 {
        return Ok(());
    }
    let resolved = cwd.join(program);
    let meta = std::fs::metadata(&resolved)
        .map_err(|e| DriverError::Spawn(format!("{}: {e}", program.display())))?;
    if !meta.is_file() {
        return Err(DriverError::Spawn(format!(
            "{}: not a regular file",
            program.display()
        )));
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if meta.permissions().mode() & 0o111 == 0 {
            let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
            return Err(DriverError::Spawn(format!("{}: {denied}", program.display())));
        }
    }
    Ok(())
}

pub struct PortablePtyChannel {
    _master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
    output: Receiver<Pumped>,
    exit_code: Option<u32>,
}

impl PtyChannel for PortablePtyChannel {
    fn read(&mut self, wait: Duration) -> Result<ReadEvent, DriverError> {
        match self.output.recv_timeout(wait) {
            Ok(Pumped::Data(bytes)) => Ok(ReadEvent::Data(bytes)),
            Ok(Pumped::Closed) | Err(RecvTimeoutError::Disconnected) => Ok(ReadEvent::Eof),
            Err(RecvTimeoutError::Timeout) => Ok(ReadEvent::Idle),
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), DriverError> {
        self.writer
            .write_all(bytes)
            .and_then(|_| self.writer.flush())
            .map_err(|e| DriverError::Io(format!("pty write failed: {e}")))
    }

    fn wait_exit(&mut self) -> Result<Option<u32>, DriverError> {
        if self.exit_code.is_none() {
            let status = self
                .child
                .wait()
                .map_err(|e| DriverError::Io(format!("wait for child failed: {e}")))?;
            self.exit_code = Some(status.exit_code());
        }
        Ok(self.exit_code)
    }

    fn terminate(&mut self) -> Result<(), DriverError> {
        let running = self
            .child
            .try_wait()
            .map_err(|e| DriverError::Io(e.to_string()))?
            .is_none();
        if running {
            self.child
                .kill()
                .map_err(|e| DriverError::Io(format!("kill child failed: {e}")))?;
            let _ = self.child.wait();
        }
        Ok(())
    }
}

impl Drop for PortablePtyChannel {
    fn drop(&mut self) {
        let _ = self.terminate();
    }
}
