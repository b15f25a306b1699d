use std::path::Path;

use crate::fs::{STDERR_TXT, STDOUT_TXT};

/// Utility for building the contents of a `run.sh` launch script.
/// Note that it modifies a String reference held internally;
/// read that String to get the script's contents.
#[derive(Debug)]
pub struct LaunchScriptBuilder<'a> {
    strbuf: &'a mut String,
}

impl<'a> LaunchScriptBuilder<'a> {
    pub fn new(strbuf: &'a mut String) -> Self {
        Self { strbuf }
    }
}

impl LaunchScriptBuilder<'_> {
    /// shebang line
    pub fn write_prefix(&mut self) {
        self.strbuf.clear();
        self.strbuf.push_str("#!/usr/bin/env bash\n");
    }

    /// activate the job environment
    pub fn write_env_activation(&mut self, setup_env_script: &str) {
        self.strbuf.push_str("source ");
        self.strbuf.push_str(&quote(setup_env_script));
        self.strbuf.push('\n');
    }

    pub fn write_cd(&mut self, node_dir: &Path) {
        self.strbuf.push_str("cd ");
        self.strbuf.push_str(&quote(&node_dir.to_string_lossy()));
        self.strbuf.push('\n');
    }

    /// run the executable with its streams redirected into the node dir.
    /// Without an interpreter, a bare executable name refers to the node dir, not `PATH`.
    pub fn write_invocation(&mut self, interpreter: &str, executable: &str) {
        if !interpreter.is_empty() {
            self.strbuf.push_str(interpreter);
            self.strbuf.push(' ');
            self.strbuf.push_str(&quote(executable));
        } else if executable.contains('/') {
            self.strbuf.push_str(&quote(executable));
        } else {
            self.strbuf.push_str(&quote(&format!("./{executable}")));
        }
        self.strbuf.push_str(" > ");
        self.strbuf.push_str(STDOUT_TXT);
        self.strbuf.push_str(" 2> ");
        self.strbuf.push_str(STDERR_TXT);
        self.strbuf.push('\n');
    }
}

/// Launch script for one node. The same text is used by every backend;
/// backends only differ in how they invoke it.
pub fn launch_script(
    setup_env_script: &str,
    node_dir: &Path,
    interpreter: &str,
    executable: &str,
) -> String {
    let mut text = String::with_capacity(256);
    let mut builder = LaunchScriptBuilder::new(&mut text);
    builder.write_prefix();
    builder.write_env_activation(setup_env_script);
    builder.write_cd(node_dir);
    builder.write_invocation(interpreter, executable);
    text
}

/// Minimal POSIX shell quoting.
pub fn quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_owned();
    }
    if s.chars().all(|c| c.is_ascii_alphanumeric() || "-_./:@=+,".contains(c)) {
        return s.to_owned();
    }
    format!("'{}'", s.replace('\'', "'\\''"))
}
