//! 能力加载器
//!
//! 启动时从配置目录解析能力描述，绑定到内置处理器；不在运行时生成代码。
//!
//! 目录结构：
//! ```text
//! config/capabilities/
//! ├── summarize/
//! │   ├── capability.toml   # 元数据与 kind（command / direct）
//! │   └── prompt.md         # 追加到系统 prompt 的说明（可选）
//! └── ...
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;

use crate::llm::LlmClient;
use crate::skills::{Capability, CapabilityDescriptor, CommandCapability, DirectAnswerCapability};

/// 处理器类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    Command,
    Direct,
}

/// capability.toml 中的 [capability] 段
#[derive(Debug, Clone, Deserialize)]
pub struct CapabilityMeta {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// 原样保留，未知值在加载时跳过
    pub kind: String,
}

#[derive(Debug, Deserialize)]
struct CapabilityToml {
    capability: CapabilityMeta,
}

/// 已解析的能力规格
#[derive(Debug, Clone)]
pub struct CapabilitySpec {
    pub descriptor: CapabilityDescriptor,
    pub kind: CapabilityKind,
    pub prompt: Option<String>,
    pub dir: PathBuf,
}

impl CapabilitySpec {
    pub fn build(&self, llm: Arc<dyn LlmClient>) -> Arc<dyn Capability> {
        let prompt = self.prompt.clone().unwrap_or_default();
        match self.kind {
            CapabilityKind::Command => Arc::new(
                CommandCapability::new(llm)
                    .with_descriptor(self.descriptor.clone())
                    .with_prompt(prompt),
            ),
            CapabilityKind::Direct => Arc::new(
                DirectAnswerCapability::new(llm)
                    .with_descriptor(self.descriptor.clone())
                    .with_prompt(prompt),
            ),
        }
    }
}

pub struct CapabilityLoader {
    dir: PathBuf,
}

impl CapabilityLoader {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// 依次尝试给定目录与 ../ 下的同名目录
    pub fn resolve(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let parent = Path::new("..").join(dir);
        if !dir.exists() && !dir.is_absolute() && parent.exists() {
            return Self::new(parent);
        }
        Self::new(dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 读取全部规格（按目录名排序）；目录不存在时返回空
    pub fn load_specs(&self) -> anyhow::Result<Vec<CapabilitySpec>> {
        if !self.dir.exists() {
            tracing::debug!(dir = %self.dir.display(), "capability dir not found");
            return Ok(Vec::new());
        }
        let mut dirs: Vec<PathBuf> = std::fs::read_dir(&self.dir)
            .with_context(|| format!("reading {}", self.dir.display()))?
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();

        let mut specs = Vec::new();
        for dir in dirs {
            match Self::load_spec(&dir) {
                Ok(Some(spec)) => specs.push(spec),
                Ok(None) => {}
                Err(e) => tracing::warn!(dir = %dir.display(), error = %e, "skipping capability"),
            }
        }
        tracing::info!("Loaded {} capability descriptors", specs.len());
        Ok(specs)
    }

    /// 读取并绑定到内置处理器
    pub fn load_all(&self, llm: &Arc<dyn LlmClient>) -> anyhow::Result<Vec<Arc<dyn Capability>>> {
        Ok(self
            .load_specs()?
            .iter()
            .map(|spec| spec.build(Arc::clone(llm)))
            .collect())
    }

    fn load_spec(dir: &Path) -> anyhow::Result<Option<CapabilitySpec>> {
        let toml_path = dir.join("capability.toml");
        if !toml_path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&toml_path)
            .with_context(|| format!("reading {}", toml_path.display()))?;
        let parsed: CapabilityToml =
            toml::from_str(&content).with_context(|| format!("parsing {}", toml_path.display()))?;
        let meta = parsed.capability;

        let kind = match meta.kind.to_lowercase().as_str() {
            "command" => CapabilityKind::Command,
            "direct" => CapabilityKind::Direct,
            other => {
                tracing::warn!(capability = %meta.name, kind = %other, "unknown capability kind, skipped");
                return Ok(None);
            }
        };

        let prompt = std::fs::read_to_string(dir.join("prompt.md"))
            .ok()
            .filter(|p| !p.trim().is_empty());

        Ok(Some(CapabilitySpec {
            descriptor: CapabilityDescriptor::new(meta.name, meta.description).with_tags(meta.tags),
            kind,
            prompt,
            dir: dir.to_path_buf(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    fn write(dir: &Path, id: &str, toml: &str, prompt: Option<&str>) {
        let d = dir.join(id);
        std::fs::create_dir_all(&d).unwrap();
        std::fs::write(d.join("capability.toml"), toml).unwrap();
        if let Some(p) = prompt {
            std::fs::write(d.join("prompt.md"), p).unwrap();
        }
    }

    #[test]
    fn test_loads_and_binds_kinds() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "summarize",
            r#"
            [capability]
            name = "summarize"
            description = "Summarize text"
            tags = ["text"]
            kind = "direct"
            "#,
            Some("Keep it under five sentences."),
        );
        write(
            tmp.path(),
            "git",
            r#"
            [capability]
            name = "git"
            description = "Git operations"
            kind = "command"
            "#,
            None,
        );
        write(
            tmp.path(),
            "browser",
            r#"
            [capability]
            name = "browser"
            description = "Web automation"
            kind = "playwright"
            "#,
            None,
        );
        std::fs::create_dir_all(tmp.path().join("empty")).unwrap();

        let loader = CapabilityLoader::new(tmp.path());
        let specs = loader.load_specs().unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].descriptor.name, "git");
        assert_eq!(specs[1].kind, CapabilityKind::Direct);
        assert_eq!(specs[1].prompt.as_deref(), Some("Keep it under five sentences."));

        let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::default());
        let caps = loader.load_all(&llm).unwrap();
        assert_eq!(caps[1].descriptor().tags, vec!["text"]);
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let loader = CapabilityLoader::new("/definitely/not/here");
        assert!(loader.load_specs().unwrap().is_empty());
    }

    #[test]
    fn test_bad_toml_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "broken", "not = [valid", None);
        assert!(CapabilityLoader::new(tmp.path()).load_specs().unwrap().is_empty());
    }
}
