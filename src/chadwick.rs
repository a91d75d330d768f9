//! Runs the Chadwick converters over Retrosheet event files.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result, bail};
use tracing::{debug, warn};

use crate::error::EtlError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Event,
    Game,
}

impl Tool {
    pub fn binary(self) -> &'static str {
        match self {
            Tool::Event => "cwevent",
            Tool::Game => "cwgame",
        }
    }

    /// Arguments before the input files. The field ranges must stay in step
    /// with `layout::EVENT_FIELDS` / `layout::GAME_FIELDS`.
    pub fn args(self, year: &str) -> Vec<String> {
        let mut args: Vec<String> = match self {
            Tool::Event => ["-q", "-n", "-f", "0-96", "-x", "0-62"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            Tool::Game => ["-q", "-n", "-f", "0-83"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        };
        args.push("-y".to_string());
        args.push(year.to_string());
        args
    }
}

#[derive(Debug, Clone)]
pub struct Toolchain {
    pub dir: PathBuf,
    pub cwevent: PathBuf,
    pub cwgame: PathBuf,
}

fn find_tool(dir: &Path, tool: &'static str) -> Result<PathBuf, EtlError> {
    [dir.join(tool), dir.join("cwtools").join(tool)]
        .into_iter()
        .find(|p| p.is_file())
        .ok_or(EtlError::ToolMissing {
            tool,
            dir: dir.to_path_buf(),
        })
}

impl Toolchain {
    pub fn locate(dir: &Path) -> Result<Self, EtlError> {
        let dir = std::path::absolute(dir).unwrap_or_else(|_| dir.to_path_buf());
        if !dir.is_dir() {
            return Err(EtlError::ToolMissing {
                tool: "chadwick",
                dir,
            });
        }
        let cwevent = find_tool(&dir, Tool::Event.binary())?;
        let cwgame = find_tool(&dir, Tool::Game.binary())?;
        Ok(Self {
            dir,
            cwevent,
            cwgame,
        })
    }

    fn path_of(&self, tool: Tool) -> &Path {
        match tool {
            Tool::Event => &self.cwevent,
            Tool::Game => &self.cwgame,
        }
    }

    fn library_path(&self) -> Result<std::ffi::OsString> {
        let mut dirs = vec![self.dir.join("cwlib").join(".libs")];
        if let Some(existing) = std::env::var_os("LD_LIBRARY_PATH") {
            dirs.extend(std::env::split_paths(&existing));
        }
        std::env::join_paths(dirs).context("build LD_LIBRARY_PATH")
    }

    /// Runs `tool` for `year` over `inputs` (names relative to `workdir`),
    /// writing stdout to `out`. A failed run leaves no output file behind.
    pub fn run(
        &self,
        tool: Tool,
        year: &str,
        inputs: &[String],
        workdir: &Path,
        out: &Path,
    ) -> Result<()> {
        let stdout = File::create(out).with_context(|| format!("create {}", out.display()))?;
        let args = tool.args(year);
        debug!(
            tool = tool.binary(),
            ?args,
            files = inputs.len(),
            out = %out.display(),
            "running converter"
        );

        let result = Command::new(self.path_of(tool))
            .args(&args)
            .args(inputs)
            .current_dir(workdir)
            .env("LD_LIBRARY_PATH", self.library_path()?)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::piped())
            .output();

        let failure = match result {
            Ok(output) if output.status.success() => return Ok(()),
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                format!("{} exited with {}: {}", tool.binary(), output.status, stderr.trim())
            }
            Err(err) => format!("failed to start {}: {err}", tool.binary()),
        };
        if let Err(err) = fs::remove_file(out) {
            warn!(out = %out.display(), error = %err, "could not remove partial output");
        }
        bail!(failure)
    }
}
