//! Scripted installer interactions.

use crate::errors::DriverError;
use crate::matcher::PatternSet;
use crate::session::Session;
use crate::types::Credentials;

pub const USERNAME_PROMPT: &str = "Enter your vCenter Administrator Username: ";
pub const PASSWORD_PROMPT: &str = "Enter your vCenter Administrator Password: ";
pub const ROOT_PROMPT: &str = "root@.*";
pub const HOST_KEY_PROMPT: &str = ".*continue connecting.*";
pub const ALL_DONE: &str = ".*When all done.*";
pub const ANY_ERROR: &str = ".*Error.*";
pub const UNINSTALL_SUCCESS: &str = ".*successful";
pub const UNREGISTER_FAILED: &str = "Error! Could not unregister.*";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    VcenterUser,
    VcenterPassword,
    RootPassword,
    Literal(&'static str),
}

impl Input {
    fn is_secret(self) -> bool {
        matches!(self, Self::VcenterPassword | Self::RootPassword)
    }

    fn resolve(self, credentials: &Credentials) -> Result<&str, DriverError> {
        match self {
            Self::VcenterUser => Ok(&credentials.vcenter_user),
            Self::VcenterPassword => Ok(&credentials.vcenter_password),
            Self::RootPassword => credentials.root_password.as_deref().ok_or_else(|| {
                DriverError::InvalidConfig("root password is required".to_string())
            }),
            Self::Literal(text) => Ok(text),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Step {
    Expect(PatternSet),
    SendLine(Input),
    /// Runs `arms[i]` when pattern `i` of `on` matched; missing arms are empty.
    Branch {
        on: PatternSet,
        arms: Vec<Vec<Step>>,
    },
    ExpectFailure(PatternSet),
    ExpectEof,
}

#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: String,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioResult {
    Passed,
    Failed { message: String },
}

impl Scenario {
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }

    pub fn needs_root_password(&self) -> bool {
        steps_use(&self.steps, Input::RootPassword)
    }

    pub fn run(
        &self,
        session: &mut Session,
        credentials: &Credentials,
    ) -> Result<ScenarioResult, DriverError> {
        match run_steps(&self.steps, session, credentials) {
            Ok(()) => Ok(ScenarioResult::Passed),
            Err(StepFailure::Eof(message)) => Ok(ScenarioResult::Failed { message }),
            Err(StepFailure::Error(err)) => Err(err),
        }
    }
}

enum StepFailure {
    Eof(String),
    Error(DriverError),
}

impl From<DriverError> for StepFailure {
    fn from(err: DriverError) -> Self {
        Self::Error(err)
    }
}

fn steps_use(steps: &[Step], input: Input) -> bool {
    steps.iter().any(|step| match step {
        Step::SendLine(used) => *used == input,
        Step::Branch { arms, .. } => arms.iter().any(|arm| steps_use(arm, input)),
        _ => false,
    })
}

fn run_steps(
    steps: &[Step],
    session: &mut Session,
    credentials: &Credentials,
) -> Result<(), StepFailure> {
    for step in steps {
        match step {
            Step::Expect(set) => {
                await_prompt(session, set, |err| err.to_string())?;
            }
            Step::SendLine(input) => {
                let value = input.resolve(credentials)?;
                session.send_line(value, input.is_secret())?;
            }
            Step::Branch { on, arms } => {
                let index = await_prompt(session, on, |err| err.to_string())?;
                if let Some(arm) = arms.get(index) {
                    run_steps(arm, session, credentials)?;
                }
            }
            Step::ExpectFailure(set) => {
                await_prompt(session, set, |err| {
                    format!("installer finished without reporting the expected failure ({err})")
                })?;
            }
            Step::ExpectEof => {
                session.expect_eof()?;
            }
        }
    }
    Ok(())
}

fn await_prompt(
    session: &mut Session,
    set: &PatternSet,
    describe_eof: impl Fn(&DriverError) -> String,
) -> Result<usize, StepFailure> {
    match session.expect(set) {
        Ok(resolved) => Ok(resolved.index),
        Err(err @ DriverError::UnexpectedEof { .. }) => Err(StepFailure::Eof(describe_eof(&err))),
        Err(err) => Err(StepFailure::Error(err)),
    }
}

fn expect(pattern: &str) -> Result<Step, DriverError> {
    Ok(Step::Expect(PatternSet::single(pattern)?))
}

/// Username then password, the opening exchange of both installer scripts.
pub fn credential_steps() -> Result<Vec<Step>, DriverError> {
    Ok(vec![
        expect(USERNAME_PROMPT)?,
        Step::SendLine(Input::VcenterUser),
        expect(PASSWORD_PROMPT)?,
        Step::SendLine(Input::VcenterPassword),
    ])
}

fn root_login_steps() -> Result<Vec<Step>, DriverError> {
    Ok(vec![Step::Branch {
        on: PatternSet::new().then(ROOT_PROMPT)?.then(HOST_KEY_PROMPT)?,
        arms: vec![
            vec![],
            vec![Step::SendLine(Input::Literal("yes")), expect(ROOT_PROMPT)?],
        ],
    }])
}

pub fn install() -> Result<Scenario, DriverError> {
    let mut steps = credential_steps()?;
    steps.extend(root_login_steps()?);
    steps.extend([
        Step::SendLine(Input::RootPassword),
        expect(ROOT_PROMPT)?,
        Step::SendLine(Input::RootPassword),
        expect(ROOT_PROMPT)?,
        Step::SendLine(Input::RootPassword),
        Step::ExpectEof,
    ]);
    Ok(Scenario::new("install", steps))
}

pub fn install_without_bash() -> Result<Scenario, DriverError> {
    let mut steps = credential_steps()?;
    steps.extend(root_login_steps()?);
    steps.extend([
        Step::SendLine(Input::RootPassword),
        expect(ALL_DONE)?,
        Step::ExpectEof,
    ]);
    Ok(Scenario::new("install-without-bash", steps))
}

pub fn install_fails_for_wrong_vcenter_ip() -> Result<Scenario, DriverError> {
    let mut steps = credential_steps()?;
    steps.extend([Step::ExpectFailure(PatternSet::single(ANY_ERROR)?), Step::ExpectEof]);
    Ok(Scenario::new("install-fails-wrong-vcenter-ip", steps))
}

/// `no_url` covers the variant where the installer gets as far as logging
/// into the appliance before extension registration fails.
pub fn install_fails_at_extension_reg(no_url: bool) -> Result<Scenario, DriverError> {
    let mut steps = credential_steps()?;
    if no_url {
        steps.extend(root_login_steps()?);
        steps.push(Step::SendLine(Input::RootPassword));
    }
    steps.extend([Step::ExpectFailure(PatternSet::single(ANY_ERROR)?), Step::ExpectEof]);
    Ok(Scenario::new("install-fails-at-extension-reg", steps))
}

pub fn uninstall() -> Result<Scenario, DriverError> {
    let mut steps = credential_steps()?;
    steps.extend([
        Step::Expect(
            PatternSet::new()
                .then(UNINSTALL_SUCCESS)?
                .then(UNREGISTER_FAILED)?,
        ),
        Step::ExpectEof,
    ]);
    Ok(Scenario::new("uninstall", steps))
}

pub fn uninstall_fails() -> Result<Scenario, DriverError> {
    let mut steps = credential_steps()?;
    steps.extend([Step::ExpectFailure(PatternSet::single(ANY_ERROR)?), Step::ExpectEof]);
    Ok(Scenario::new("uninstall-fails", steps))
}

pub fn run_to_completion(name: &str) -> Scenario {
    Scenario::new(name, vec![Step::ExpectEof])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::JsonlLogger;
    use crate::runtime::{FakePtySpawner, ScriptedRead, SpawnRequest};
    use crate::session::SessionOptions;
    use std::path::PathBuf;
    use std::time::Duration;

    struct Harness {
        _dir: tempfile::TempDir,
        spawner: FakePtySpawner,
        session: Session,
    }

    fn harness(reads: Vec<ScriptedRead>) -> Harness {
        let dir = tempfile::tempdir().expect("tempdir");
        let logger = JsonlLogger::new(dir.path().join("events.jsonl"));
        let spawner = FakePtySpawner::default();
        spawner.push_script(reads);
        let session = Session::spawn(
            &spawner,
            SessionOptions {
                name: "test".to_string(),
                request: SpawnRequest {
                    program: PathBuf::from("/opt/installer/install.sh"),
                    args: vec![],
                    cwd: PathBuf::from("/opt/installer"),
                    env: vec![],
                },
                log_path: dir.path().join("install.log"),
                timeout: Duration::from_millis(300),
            },
            &logger,
        )
        .expect("spawn");
        Harness {
            _dir: dir,
            spawner,
            session,
        }
    }

    fn out(text: &str) -> ScriptedRead {
        ScriptedRead::Output(text.to_string())
    }

    fn creds() -> Credentials {
        Credentials::new("administrator@vsphere.local", "vc-pass").with_root_password("root-pass")
    }

    fn credential_output() -> Vec<ScriptedRead> {
        vec![out(USERNAME_PROMPT), out(PASSWORD_PROMPT)]
    }

    #[test]
    fn install_confirms_unknown_host_key_before_root_login() {
        let mut reads = credential_output();
        reads.extend([
            out("Are you sure you want to continue connecting (yes/no)? "),
            out("root@10.0.0.5's password: "),
            out("root@10.0.0.5's password: "),
            out("root@10.0.0.5's password: "),
            out("done\r\n"),
            ScriptedRead::Eof,
        ]);
        let mut h = harness(reads);
        let result = install().expect("scenario").run(&mut h.session, &creds()).expect("run");
        assert_eq!(result, ScenarioResult::Passed);
        assert_eq!(
            h.spawner.sent(),
            vec![
                "administrator@vsphere.local\n",
                "vc-pass\n",
                "yes\n",
                "root-pass\n",
                "root-pass\n",
                "root-pass\n",
            ]
        );
    }

    #[test]
    fn install_with_known_host_skips_confirmation() {
        let mut reads = credential_output();
        reads.extend([
            out("root@vcsa's password: "),
            out("root@vcsa's password: "),
            out("root@vcsa's password: "),
            ScriptedRead::Eof,
        ]);
        let mut h = harness(reads);
        let result = install().expect("scenario").run(&mut h.session, &creds()).expect("run");
        assert_eq!(result, ScenarioResult::Passed);
        assert!(!h.spawner.sent().contains(&"yes\n".to_string()));
        assert_eq!(h.spawner.sent().len(), 5);
    }

    #[test]
    fn negative_scenario_passes_when_error_is_reported() {
        let mut reads = credential_output();
        reads.extend([out("Error: could not reach vCenter\r\n"), ScriptedRead::Eof]);
        let mut h = harness(reads);
        let result = install_fails_for_wrong_vcenter_ip()
            .expect("scenario")
            .run(&mut h.session, &creds())
            .expect("run");
        assert_eq!(result, ScenarioResult::Passed);
    }

    #[test]
    fn negative_scenario_fails_when_stream_ends_without_error() {
        let mut reads = credential_output();
        reads.extend([out("Installation succeeded\r\n"), ScriptedRead::Eof]);
        let mut h = harness(reads);
        let result = uninstall_fails()
            .expect("scenario")
            .run(&mut h.session, &creds())
            .expect("run");
        match result {
            ScenarioResult::Failed { message } => {
                assert!(message.contains("without reporting the expected failure"), "{message}")
            }
            ScenarioResult::Passed => panic!("missing error must not pass"),
        }
    }

    #[test]
    fn uninstall_accepts_either_outcome_line() {
        for line in ["Plugin unregistration successful", "Error! Could not unregister plugin"] {
            let mut reads = credential_output();
            reads.extend([out(line), ScriptedRead::Eof]);
            let mut h = harness(reads);
            let result = uninstall().expect("scenario").run(&mut h.session, &creds()).expect("run");
            assert_eq!(result, ScenarioResult::Passed, "{line}");
        }
    }

    #[test]
    fn prompt_timeout_propagates_as_error() {
        let mut h = harness(vec![out(USERNAME_PROMPT)]);
        let err = install()
            .expect("scenario")
            .run(&mut h.session, &creds())
            .expect_err("timeout");
        assert!(matches!(err, DriverError::Timeout { .. }));
    }

    #[test]
    fn run_to_completion_passes_on_eof() {
        let mut h = harness(vec![out("[INFO] BUILD SUCCESS\r\n"), ScriptedRead::Eof]);
        let result = run_to_completion("ngc-tests")
            .run(&mut h.session, &creds())
            .expect("run");
        assert_eq!(result, ScenarioResult::Passed);
        assert!(h.spawner.sent().is_empty());
    }

    #[test]
    fn root_password_requirement_follows_the_steps() {
        assert!(install().expect("install").needs_root_password());
        assert!(install_fails_at_extension_reg(true).expect("nourl").needs_root_password());
        assert!(!install_fails_at_extension_reg(false).expect("url").needs_root_password());
        assert!(!uninstall().expect("uninstall").needs_root_password());
        assert!(install_without_bash().expect("no bash").needs_root_password());
        assert!(!install_fails_for_wrong_vcenter_ip().expect("bad ip").needs_root_password());
        assert!(!run_to_completion("ngc-tests").needs_root_password());
    }
}
