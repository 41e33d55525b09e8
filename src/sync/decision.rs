use std::{
    io::{BufRead, IsTerminal},
    sync::mpsc,
    time::Duration,
};

use log::{info, warn};

use super::{SyncDecision, TargetState};

pub const DEFAULT_PROMPT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistingChoice {
    Update,
    Reinstall,
    Cancel,
}

impl ExistingChoice {
    /// Anything unrecognised is an update, since updating is safe to repeat.
    pub fn parse(input: &str) -> ExistingChoice {
        match input.trim().to_lowercase().as_str() {
            "2" | "r" | "reinstall" | "w" | "wipe" => ExistingChoice::Reinstall,
            "3" | "c" | "cancel" | "q" | "quit" => ExistingChoice::Cancel,
            _ => ExistingChoice::Update,
        }
    }
}

/// Where the answer to the existing-installation question comes from.
pub trait ChoiceSource {
    /// Shows `prompt` and waits at most `timeout` for one line of input.
    /// `None` means no answer arrived in time or input is closed.
    fn ask(&mut self, prompt: &str, timeout: Duration) -> Option<String>;
}

/// Reads the answer from standard input on a helper thread so the wait can time out.
#[derive(Debug, Default)]
pub struct StdinChoice;

impl ChoiceSource for StdinChoice {
    fn ask(&mut self, prompt: &str, timeout: Duration) -> Option<String> {
        eprintln!("{prompt}");
        let (sender, receiver) = mpsc::channel();
        std::thread::spawn(move || {
            let mut line = String::new();
            let read = std::io::stdin().lock().read_line(&mut line);
            // The receiver is gone once the deadline has passed
            let _ = sender.send(read.ok().filter(|read| *read > 0).map(|_| line));
        });
        receiver.recv_timeout(timeout).ok().flatten()
    }
}

fn describe(state: TargetState) -> &'static str {
    match state {
        TargetState::PresentNonVcs => "A directory that is not a git checkout",
        _ => "An existing installation",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecisionPolicy {
    pub interactive: bool,
    pub timeout: Duration,
}

impl DecisionPolicy {
    /// Interactive only when neither toggle is set and stdin is a terminal.
    pub fn from_environment(auto_update: bool, non_interactive: bool, timeout: Duration) -> Self {
        DecisionPolicy {
            interactive: !auto_update && !non_interactive && std::io::stdin().is_terminal(),
            timeout,
        }
    }

    pub fn decide(&self, state: TargetState, source: &mut dyn ChoiceSource) -> SyncDecision {
        let default = match state {
            TargetState::Absent => return SyncDecision::CloneFresh,
            TargetState::PresentVcs => SyncDecision::UpdateInPlace,
            TargetState::PresentNonVcs => SyncDecision::ReplaceAndClone,
        };
        if !self.interactive {
            info!("{} found, continuing without prompting", describe(state));
            return default;
        }

        let prompt = format!(
            "{} was found at the installation path.\n  \
             1) Update it (default)\n  \
             2) Remove it and reinstall\n  \
             3) Cancel\n\
             Choose [1-3] within {} seconds:",
            describe(state),
            self.timeout.as_secs()
        );
        let choice = match source.ask(&prompt, self.timeout) {
            Some(answer) => ExistingChoice::parse(&answer),
            None => {
                warn!("No answer received, updating the existing installation");
                ExistingChoice::Update
            }
        };
        match choice {
            ExistingChoice::Update => default,
            ExistingChoice::Reinstall => SyncDecision::ReplaceAndClone,
            ExistingChoice::Cancel => SyncDecision::Abort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    struct Scripted(Option<&'static str>);

    impl ChoiceSource for Scripted {
        fn ask(&mut self, _prompt: &str, _timeout: Duration) -> Option<String> {
            self.0.map(str::to_owned)
        }
    }

    struct MustNotAsk;

    impl ChoiceSource for MustNotAsk {
        fn ask(&mut self, prompt: &str, _timeout: Duration) -> Option<String> {
            panic!("unexpected prompt: {prompt}")
        }
    }

    const INTERACTIVE: DecisionPolicy = DecisionPolicy {
        interactive: true,
        timeout: Duration::from_secs(1),
    };

    #[test]
    fn absent_target_is_cloned_without_prompt() {
        assert_eq!(
            INTERACTIVE.decide(TargetState::Absent, &mut MustNotAsk),
            SyncDecision::CloneFresh
        );
    }

    #[test]
    fn non_interactive_always_updates() {
        let policy = DecisionPolicy {
            interactive: false,
            ..INTERACTIVE
        };
        assert_eq!(
            policy.decide(TargetState::PresentVcs, &mut MustNotAsk),
            SyncDecision::UpdateInPlace
        );
        assert_eq!(
            policy.decide(TargetState::PresentNonVcs, &mut MustNotAsk),
            SyncDecision::ReplaceAndClone
        );
    }

    #[test]
    fn toggles_force_non_interactive() {
        assert!(
            !DecisionPolicy::from_environment(true, false, DEFAULT_PROMPT_TIMEOUT).interactive
        );
        assert!(
            !DecisionPolicy::from_environment(false, true, DEFAULT_PROMPT_TIMEOUT).interactive
        );
    }

    #[test]
    fn timeout_defaults_to_update() {
        assert_eq!(
            INTERACTIVE.decide(TargetState::PresentVcs, &mut Scripted(None)),
            SyncDecision::UpdateInPlace
        );
    }

    #[test]
    fn interactive_choices() {
        let cases = [
            ("1", SyncDecision::UpdateInPlace),
            ("2", SyncDecision::ReplaceAndClone),
            ("reinstall\n", SyncDecision::ReplaceAndClone),
            ("3", SyncDecision::Abort),
            ("Cancel", SyncDecision::Abort),
            ("banana", SyncDecision::UpdateInPlace),
            ("", SyncDecision::UpdateInPlace),
        ];
        for (answer, expected) in cases {
            assert_eq!(
                INTERACTIVE.decide(TargetState::PresentVcs, &mut Scripted(Some(answer))),
                expected,
                "answer {answer:?}"
            );
        }
    }

    #[test]
    fn foreign_directory_can_be_cancelled() {
        assert_eq!(
            INTERACTIVE.decide(TargetState::PresentNonVcs, &mut Scripted(Some("3"))),
            SyncDecision::Abort
        );
        assert_eq!(
            INTERACTIVE.decide(TargetState::PresentNonVcs, &mut Scripted(Some("1"))),
            SyncDecision::ReplaceAndClone
        );
    }
}
