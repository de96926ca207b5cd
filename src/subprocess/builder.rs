use std::path::Path;
use std::time::Duration;

use crate::subprocess::ProcessCommand;

/// Fluent construction of a [`ProcessCommand`]
pub struct ProcessCommandBuilder {
    command: ProcessCommand,
}

impl ProcessCommandBuilder {
    pub fn new(program: &str) -> Self {
        Self {
            command: ProcessCommand {
                program: program.to_string(),
                ..Default::default()
            },
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.command.args.push(arg.into());
        self
    }

    /// Append `arg` only when `enabled`; flags are never passed as empty strings
    pub fn arg_if(self, enabled: bool, arg: impl Into<String>) -> Self {
        if enabled {
            self.arg(arg)
        } else {
            self
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Extra environment on top of the inherited one
    pub fn envs<'a, I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        self.command
            .env
            .extend(vars.into_iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.command.working_dir = Some(dir.to_path_buf());
        self
    }

    /// `None` lets the process run until it exits on its own
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command.timeout = timeout;
        self
    }

    pub fn max_line_length(mut self, limit: Option<usize>) -> Self {
        self.command.max_line_length = limit;
        self
    }

    pub fn kill_grace(mut self, grace: Duration) -> Self {
        self.command.kill_grace = grace;
        self
    }

    pub fn build(self) -> ProcessCommand {
        self.command
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;

    #[test]
    fn test_builder_collects_args_and_env() {
        let env: HashMap<String, String> = [("CI".to_string(), "true".to_string())].into();
        let command = ProcessCommandBuilder::new("pnpm")
            .arg("install")
            .args(["--reporter", "ndjson"])
            .envs(&env)
            .current_dir(Path::new("/work"))
            .timeout(Some(Duration::from_secs(30)))
            .max_line_length(None)
            .kill_grace(Duration::from_secs(1))
            .build();

        assert_eq!(command.program, "pnpm");
        assert_eq!(command.args, vec!["install", "--reporter", "ndjson"]);
        assert_eq!(command.env.get("CI").map(String::as_str), Some("true"));
        assert_eq!(command.working_dir, Some(PathBuf::from("/work")));
        assert_eq!(command.timeout, Some(Duration::from_secs(30)));
        assert_eq!(command.max_line_length, None);
        assert_eq!(command.kill_grace, Duration::from_secs(1));
    }

    #[test]
    fn test_arg_if_skips_disabled_flags() {
        let command = ProcessCommandBuilder::new("pnpm")
            .arg("install")
            .arg_if(false, "--dev")
            .arg("left-pad")
            .build();
        assert_eq!(command.args, vec!["install", "left-pad"]);

        let command = ProcessCommandBuilder::new("pnpm").arg_if(true, "--dev").build();
        assert_eq!(command.args, vec!["--dev"]);
    }
}
