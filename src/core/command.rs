use crate::core::error::SweepError;
use crate::core::grid::Assignment;
use std::path::Path;

/// Renders grid points into argv vectors for one target script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBuilder {
    launcher: Vec<String>,
    script: String,
}

impl CommandBuilder {
    /// Run `script` directly, with no interpreter in front of it.
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            launcher: Vec::new(),
            script: script.into(),
        }
    }

    pub fn with_launcher<I, S>(mut self, launcher: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.launcher = launcher.into_iter().map(Into::into).collect();
        self
    }

    /// Pick the launcher for `script`.
    ///
    /// An explicit launcher always wins (an empty one means "run directly").
    /// Otherwise `.py` files go through `python` and `.sh` files through `sh`.
    ///
    /// # Examples
    ///
    /// ```
    /// use gsweep::core::command::CommandBuilder;
    /// use gsweep::core::grid::Assignment;
    ///
    /// let builder = CommandBuilder::for_script("toy.py", None, "python");
    /// assert_eq!(builder.build(&Assignment::default()), vec!["python", "toy.py"]);
    ///
    /// let builder = CommandBuilder::for_script("toy.py", Some("python -u"), "python");
    /// assert_eq!(builder.build(&Assignment::default()), vec!["python", "-u", "toy.py"]);
    ///
    /// let builder = CommandBuilder::for_script("./train", None, "python");
    /// assert_eq!(builder.build(&Assignment::default()), vec!["./train"]);
    /// ```
    pub fn for_script(script: &str, launcher: Option<&str>, python: &str) -> Self {
        let builder = Self::new(script);
        if let Some(launcher) = launcher {
            return builder.with_launcher(launcher.split_whitespace());
        }

        match Path::new(script).extension().and_then(|ext| ext.to_str()) {
            Some("py") => builder.with_launcher(python.split_whitespace()),
            Some("sh") => builder.with_launcher(["sh"]),
            _ => builder,
        }
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn launcher(&self) -> &[String] {
        &self.launcher
    }

    /// `[launcher..., script, --name1, value1, --name2, value2, ...]`.
    ///
    /// Parameters come out in the order they were declared on the command
    /// line, which is the order `ArgumentGrid::expand` stores them in.
    pub fn build(&self, assignment: &Assignment) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.prefix_len() + assignment.len() * 2);
        argv.extend(self.launcher.iter().cloned());
        argv.push(self.script.clone());
        for (name, value) in assignment.iter() {
            argv.push(format!("--{name}"));
            argv.push(value.to_string());
        }
        argv
    }

    /// Recover the assignment from an argv produced by [`CommandBuilder::build`].
    pub fn parse_rendered(&self, argv: &[String]) -> Result<Assignment, SweepError> {
        let prefix = self.prefix_len();
        if argv.len() < prefix
            || argv[..self.launcher.len()] != self.launcher[..]
            || argv[self.launcher.len()] != self.script
        {
            return Err(SweepError::malformed(
                "command does not start with the expected launcher and script",
            ));
        }

        let rest = &argv[prefix..];
        if rest.len() % 2 != 0 {
            return Err(SweepError::malformed(
                "command has a flag without a value",
            ));
        }

        rest.chunks(2)
            .map(|pair| {
                let name = pair[0].strip_prefix("--").ok_or_else(|| {
                    SweepError::malformed(format!("expected --<name>, found '{}'", pair[0]))
                })?;
                Ok((name.to_string(), pair[1].clone()))
            })
            .collect()
    }

    fn prefix_len(&self) -> usize {
        self.launcher.len() + 1
    }
}

/// Render argv the way the dry-run listing shows it: tokens joined by spaces.
pub fn display_command(argv: &[String]) -> String {
    argv.join(" ")
}

/// Render argv as a copy-pasteable shell line.
pub fn shell_command_line(argv: &[String]) -> String {
    argv.iter()
        .map(|token| shell_escape::escape(token.as_str().into()).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}
