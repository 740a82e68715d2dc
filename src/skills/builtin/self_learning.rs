//! `self_learning` entry point: lets the model add packages to the skills
//! root. The engine rescans after each call.

use super::decode_args;
use crate::directive::Arguments;
use crate::skills::{
    ArgKind, Capability, CapabilityError, CapabilityTable, LoadContext, LogicManifest, ParamSpec,
    DOC_FILE, LOGIC_FILE,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub fn self_learning(ctx: &LoadContext) -> CapabilityTable {
    let mut table = CapabilityTable::new();
    table.insert(
        "deploy_new_skill".to_string(),
        Arc::new(DeployNewSkill::new(ctx.skills_root.clone())),
    );
    table.insert(
        "write_skill_doc".to_string(),
        Arc::new(WriteSkillDoc::new(ctx.skills_root.clone())),
    );
    table
}

/// A single path component of `[A-Za-z0-9_-]`
pub fn is_valid_skill_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn package_dir(root: &Path, skill_name: &str) -> Result<PathBuf, CapabilityError> {
    if !is_valid_skill_name(skill_name) {
        return Err(CapabilityError::execution(format!(
            "invalid skill name '{}': use letters, digits, '_' or '-'",
            skill_name
        )));
    }
    Ok(root.join(skill_name))
}

async fn write_package_file(dir: &Path, file: &str, content: &str) -> Result<PathBuf, CapabilityError> {
    tokio::fs::create_dir_all(dir).await.map_err(|e| {
        CapabilityError::execution(format!("failed to create {}: {}", dir.display(), e))
    })?;
    let path = dir.join(file);
    tokio::fs::write(&path, content).await.map_err(|e| {
        CapabilityError::execution(format!("failed to write {}: {}", path.display(), e))
    })?;
    Ok(path)
}

#[derive(Debug, Deserialize)]
struct DeployArgs {
    skill_name: String,
    logic_content: String,
}

struct DeployNewSkill {
    skills_root: PathBuf,
    params: Vec<ParamSpec>,
}

impl DeployNewSkill {
    fn new(skills_root: PathBuf) -> Self {
        Self {
            skills_root,
            params: vec![
                ParamSpec::required("skill_name", ArgKind::String),
                ParamSpec::required("logic_content", ArgKind::String),
            ],
        }
    }
}

#[async_trait]
impl Capability for DeployNewSkill {
    fn description(&self) -> &str {
        "Deploy or replace a skill package's logic.yaml (put the YAML between [CONTENT_START] and [CONTENT_END])"
    }

    fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    async fn invoke(&self, args: Arguments) -> Result<String, CapabilityError> {
        let args: DeployArgs = decode_args("deploy_new_skill", args)?;
        let dir = package_dir(&self.skills_root, &args.skill_name)?;

        let manifest = LogicManifest::parse(&args.logic_content)
            .map_err(|reason| CapabilityError::execution(format!("rejected logic: {}", reason)))?;

        let path = write_package_file(&dir, LOGIC_FILE, &args.logic_content).await?;
        info!(skill = %args.skill_name, path = %path.display(), "deployed skill logic");

        let declared = manifest.capabilities.keys().cloned().collect::<Vec<_>>();
        let mut summary = format!("deployed skill '{}' to {}", args.skill_name, path.display());
        if let Some(entry) = &manifest.entry {
            summary.push_str(&format!("; entry point '{}'", entry));
        }
        if !declared.is_empty() {
            summary.push_str(&format!("; capabilities: {}", declared.join(", ")));
        }
        Ok(summary)
    }
}

#[derive(Debug, Deserialize)]
struct DocArgs {
    skill_name: String,
    content: String,
}

struct WriteSkillDoc {
    skills_root: PathBuf,
    params: Vec<ParamSpec>,
}

impl WriteSkillDoc {
    fn new(skills_root: PathBuf) -> Self {
        Self {
            skills_root,
            params: vec![
                ParamSpec::required("skill_name", ArgKind::String),
                ParamSpec::required("content", ArgKind::String),
            ],
        }
    }
}

#[async_trait]
impl Capability for WriteSkillDoc {
    fn description(&self) -> &str {
        "Write a skill package's doc.md manual (may include a 'Preferred Brain: <model id>' line)"
    }

    fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    async fn invoke(&self, args: Arguments) -> Result<String, CapabilityError> {
        let args: DocArgs = decode_args("write_skill_doc", args)?;
        let dir = package_dir(&self.skills_root, &args.skill_name)?;
        let path = write_package_file(&dir, DOC_FILE, &args.content).await?;
        info!(skill = %args.skill_name, path = %path.display(), "wrote skill manual");
        Ok(format!("wrote manual for skill '{}' to {}", args.skill_name, path.display()))
    }
}
