use std::path::Path;

use log::{info, warn};

use crate::{
    launcher::{ENTRY_POINT, LAUNCHER_NAME},
    materialize::RuntimeEnvironment,
    process::{CommandRunner, Invocation},
};

/// Quick checks that the installation can start. Returns warnings, never fails.
pub fn smoke_test(
    runner: &dyn CommandRunner,
    root: &Path,
    environment: &RuntimeEnvironment,
) -> Vec<String> {
    let mut warnings = Vec::new();
    let interpreter = environment.interpreter();

    let checks = [
        ("interpreter", Invocation::new(&interpreter).arg("--version")),
        (
            ENTRY_POINT,
            Invocation::new(&interpreter)
                .args(["-m", "py_compile", ENTRY_POINT])
                .current_dir(root),
        ),
    ];
    for (what, invocation) in checks {
        match runner.run(&invocation) {
            Ok(output) if output.success => info!("Smoke test passed: {}", invocation),
            Ok(output) => warnings.push(format!(
                "Smoke test of {} failed: {}",
                what,
                output.summary()
            )),
            Err(error) => warnings.push(format!("Smoke test of {what} could not run: {error}")),
        }
    }

    if !root.join(LAUNCHER_NAME).is_file() {
        warnings.push(format!("Launcher {LAUNCHER_NAME} is missing"));
    }

    for warning in &warnings {
        warn!("{}", warning);
    }
    warnings
}
