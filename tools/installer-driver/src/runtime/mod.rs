use crate::errors::DriverError;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub mod pty;

pub use pty::PortablePtySpawner;

#[derive(Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
}

impl fmt::Debug for SpawnRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env_keys = self.env.iter().map(|(key, _)| key).collect::<Vec<_>>();
        f.debug_struct("SpawnRequest")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("cwd", &self.cwd)
            .field("env", &env_keys)
            .finish()
    }
}

/// Result of a single bounded wait on a pty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadEvent {
    Data(Vec<u8>),
    Eof,
    Idle,
}

pub trait PtyChannel: Send {
    /// Waits at most `wait` for the next chunk of child output.
    fn read(&mut self, wait: Duration) -> Result<ReadEvent, DriverError>;
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), DriverError>;
    /// Reaps the child once its output has closed.
    fn wait_exit(&mut self) -> Result<Option<u32>, DriverError>;
    fn terminate(&mut self) -> Result<(), DriverError>;
}

pub trait PtySpawner: Send + Sync {
    fn spawn(&self, request: &SpawnRequest) -> Result<Box<dyn PtyChannel>, DriverError>;
}

pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> Result<String, DriverError>;
    fn create_dir_all(&self, path: &Path) -> Result<(), DriverError>;
}

pub trait Terminal: Send + Sync {
    fn write_line(&self, line: &str) -> Result<(), DriverError>;
}

pub struct ProductionFileSystem;

impl FileSystem for ProductionFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, DriverError> {
        std::fs::read_to_string(path)
            .map_err(|e| DriverError::Io(format!("{}: {e}", path.display())))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), DriverError> {
        std::fs::create_dir_all(path)
            .map_err(|e| DriverError::Io(format!("{}: {e}", path.display())))
    }
}

pub struct ProductionTerminal;

impl Terminal for ProductionTerminal {
    fn write_line(&self, line: &str) -> Result<(), DriverError> {
        use std::io::Write;
        let mut out = std::io::stdout();
        writeln!(out, "{line}").map_err(|e| DriverError::Io(e.to_string()))
    }
}

pub struct ProductionRuntime {
    pub file_system: Arc<dyn FileSystem>,
    pub spawner: Arc<dyn PtySpawner>,
    pub terminal: Arc<dyn Terminal>,
}

impl ProductionRuntime {
    pub fn new() -> Self {
        Self {
            file_system: Arc::new(ProductionFileSystem),
            spawner: Arc::new(PortablePtySpawner::default()),
            terminal: Arc::new(ProductionTerminal),
        }
    }
}

impl Default for ProductionRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default, Clone)]
pub struct FakeFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, String>>>,
}

impl FakeFileSystem {
    pub fn with_file(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        let fs = Self::default();
        fs.add_file(path, contents);
        fs
    }

    pub fn add_file(&self, path: impl Into<PathBuf>, contents: impl Into<String>) {
        self.files
            .lock()
            .expect("files lock")
            .insert(path.into(), contents.into());
    }
}

impl FileSystem for FakeFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, DriverError> {
        self.files
            .lock()
            .expect("files lock")
            .get(path)
            .cloned()
            .ok_or_else(|| DriverError::Io(format!("missing file {}", path.display())))
    }

    fn create_dir_all(&self, _path: &Path) -> Result<(), DriverError> {
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct FakeTerminal {
    writes: Arc<Mutex<Vec<String>>>,
}

impl FakeTerminal {
    pub fn written_lines(&self) -> Vec<String> {
        self.writes.lock().expect("writes lock").clone()
    }
}

impl Terminal for FakeTerminal {
    fn write_line(&self, line: &str) -> Result<(), DriverError> {
        self.writes
            .lock()
            .expect("writes lock")
            .push(line.to_string());
        Ok(())
    }
}

/// One scripted read handed back by [`ScriptedChannel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedRead {
    Output(String),
    Eof,
}

/// A pty stand-in that replays queued output and records every write.
/// Once the queue drains it reports `Idle` after sleeping out the wait.
pub struct ScriptedChannel {
    reads: VecDeque<ScriptedRead>,
    sent: Arc<Mutex<Vec<String>>>,
    terminated: Arc<Mutex<u32>>,
    exit_code: u32,
}

impl PtyChannel for ScriptedChannel {
    fn read(&mut self, wait: Duration) -> Result<ReadEvent, DriverError> {
        match self.reads.pop_front() {
            Some(ScriptedRead::Output(text)) => Ok(ReadEvent::Data(text.into_bytes())),
            Some(ScriptedRead::Eof) => {
                self.reads.push_front(ScriptedRead::Eof);
                Ok(ReadEvent::Eof)
            }
            None => {
                std::thread::sleep(wait);
                Ok(ReadEvent::Idle)
            }
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), DriverError> {
        self.sent
            .lock()
            .expect("sent lock")
            .push(String::from_utf8_lossy(bytes).to_string());
        Ok(())
    }

    fn wait_exit(&mut self) -> Result<Option<u32>, DriverError> {
        Ok(Some(self.exit_code))
    }

    fn terminate(&mut self) -> Result<(), DriverError> {
        *self.terminated.lock().expect("terminated lock") += 1;
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct FakePtySpawner {
    scripts: Arc<Mutex<VecDeque<Result<Vec<ScriptedRead>, DriverError>>>>,
    spawned: Arc<Mutex<Vec<SpawnRequest>>>,
    sent: Arc<Mutex<Vec<String>>>,
    terminated: Arc<Mutex<u32>>,
}

impl FakePtySpawner {
    pub fn push_script(&self, reads: Vec<ScriptedRead>) {
        self.scripts
            .lock()
            .expect("scripts lock")
            .push_back(Ok(reads));
    }

    pub fn push_failure(&self, error: DriverError) {
        self.scripts
            .lock()
            .expect("scripts lock")
            .push_back(Err(error));
    }

    pub fn spawned(&self) -> Vec<SpawnRequest> {
        self.spawned.lock().expect("spawned lock").clone()
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().expect("sent lock").clone()
    }

    pub fn terminations(&self) -> u32 {
        *self.terminated.lock().expect("terminated lock")
    }
}

impl PtySpawner for FakePtySpawner {
    fn spawn(&self, request: &SpawnRequest) -> Result<Box<dyn PtyChannel>, DriverError> {
        self.spawned
            .lock()
            .expect("spawned lock")
            .push(request.clone());
        let script = self
            .scripts
            .lock()
            .expect("scripts lock")
            .pop_front()
            .unwrap_or_else(|| Err(DriverError::Spawn("no fake script queued".to_string())))?;
        Ok(Box::new(ScriptedChannel {
            reads: script.into(),
            sent: Arc::clone(&self.sent),
            terminated: Arc::clone(&self.terminated),
            exit_code: 0,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::{FakePtySpawner, ReadEvent, ScriptedRead, SpawnRequest};
    use crate::runtime::PtySpawner;
    use std::path::PathBuf;
    use std::time::Duration;

    fn request() -> SpawnRequest {
        SpawnRequest {
            program: PathBuf::from("/opt/installer/install.sh"),
            args: vec![],
            cwd: PathBuf::from("/opt/installer"),
            env: vec![("VC_ADMIN_PASSWORD".to_string(), "hunter2".to_string())],
        }
    }

    #[test]
    fn scripted_channel_replays_output_then_sticks_at_eof() {
        let spawner = FakePtySpawner::default();
        spawner.push_script(vec![
            ScriptedRead::Output("hello".to_string()),
            ScriptedRead::Eof,
        ]);
        let mut channel = spawner.spawn(&request()).expect("spawn");
        let wait = Duration::from_millis(1);
        assert_eq!(
            channel.read(wait).expect("read"),
            ReadEvent::Data(b"hello".to_vec())
        );
        assert_eq!(channel.read(wait).expect("read"), ReadEvent::Eof);
        assert_eq!(channel.read(wait).expect("read"), ReadEvent::Eof);
    }

    #[test]
    fn spawner_without_script_reports_spawn_error() {
        let spawner = FakePtySpawner::default();
        let err = spawner.spawn(&request()).err().expect("must fail");
        assert!(err.is_spawn_failure());
        assert_eq!(spawner.spawned().len(), 1);
    }

    #[test]
    fn request_debug_lists_env_keys_only() {
        let rendered = format!("{:?}", request());
        assert!(rendered.contains("VC_ADMIN_PASSWORD"));
        assert!(!rendered.contains("hunter2"));
    }
}
