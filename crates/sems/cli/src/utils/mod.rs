//! Helpers shared by the commands

pub(crate) mod reader;

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use eyre::WrapErr;
use sems::{DigestAlgorithm, ScriptRequest, storage::parse_script};

/// Where the script to run comes from
#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub(crate) struct SourceArgs {
    /// File holding the script as hex text
    #[arg(long)]
    pub(crate) file: Option<PathBuf>,

    /// Name of a script in the storage
    #[arg(long)]
    pub(crate) stored: Option<String>,

    /// Script given inline as hex
    #[arg(long)]
    pub(crate) hex: Option<String>,
}

impl SourceArgs {
    /// Build the request, naming it after `name`, the file or the stored script
    pub(crate) fn request(
        &self,
        name: Option<&str>,
        comment_prefix: &str,
    ) -> eyre::Result<ScriptRequest> {
        if let Some(stored) = &self.stored {
            let mut request = ScriptRequest::stored(stored);
            if let Some(name) = name {
                request.name = name.to_string();
            }
            return Ok(request);
        }

        if let Some(path) = &self.file {
            let name = name.map(str::to_string).unwrap_or_else(|| {
                path.file_stem().map_or_else(
                    || "script".to_string(),
                    |stem| stem.to_string_lossy().into_owned(),
                )
            });
            let text = std::fs::read_to_string(path)
                .wrap_err_with(|| format!("failed to read {}", path.display()))?;
            let script = parse_script(&name, &text, comment_prefix)?;
            return Ok(ScriptRequest::buffer(name, script));
        }

        let text = self.hex.as_deref().unwrap_or_default();
        let script =
            hex::decode(text.replace(char::is_whitespace, "")).wrap_err("invalid hex script")?;
        Ok(ScriptRequest::buffer(name.unwrap_or("inline"), script))
    }
}

/// Digest applied to the caller identity
#[derive(ValueEnum, Debug, Clone, Copy)]
pub(crate) enum DigestArg {
    /// SHA-1
    Sha1,
    /// SHA-256
    Sha256,
}

impl From<DigestArg> for DigestAlgorithm {
    fn from(arg: DigestArg) -> Self {
        match arg {
            DigestArg::Sha1 => Self::Sha1,
            DigestArg::Sha256 => Self::Sha256,
        }
    }
}

/// Parse an AID given as hex
pub(crate) fn parse_aid(aid: &str) -> eyre::Result<Vec<u8>> {
    let aid = hex::decode(aid).wrap_err_with(|| format!("invalid AID '{aid}'"))?;
    eyre::ensure!((5..=16).contains(&aid.len()), "AID must be 5 to 16 bytes long");
    Ok(aid)
}
