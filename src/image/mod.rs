//! Container image description for the Lambda functions.
//!
//! Layers are laid out so that dependency resolution only reruns when the
//! manifest changes: manifest → dependencies → application source → models.
//! The rendered Dockerfile is deterministic for a given [`ImageSpec`].

pub mod descriptor;
pub mod fingerprint;

pub use descriptor::{check_descriptor, DescriptorReport};
pub use fingerprint::{first_stale_layer, fingerprint_layers, LayerDigest};

use crate::app::registry::ENTRY_POINT;
use crate::runtime::{HandlerId, DEFAULT_HANDLER};
use crate::utils::error::{AppError, Result};
use crate::utils::validation::{validate_non_empty_string, validate_path, Validate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Manifest,
    Dependencies,
    Source,
    Models,
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LayerKind::Manifest => "manifest",
            LayerKind::Dependencies => "dependencies",
            LayerKind::Source => "source",
            LayerKind::Models => "models",
        };
        f.write_str(name)
    }
}

/// One cacheable build step and the build-context paths it reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    pub kind: LayerKind,
    pub inputs: Vec<String>,
    pub instruction: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSpec {
    /// Toolchain image; the tag must carry a `major.minor` version.
    pub builder_image: String,
    pub runtime_image: String,
    pub workdir: String,
    pub manifests: Vec<String>,
    /// Build with `--locked` so every rebuild resolves the same versions.
    pub locked: bool,
    pub source_dir: String,
    pub models_dir: String,
    pub binary: String,
    pub features: Vec<String>,
    pub entrypoint: String,
    pub handler: String,
    /// Default of the `FUNCTION` build argument.
    pub default_function: String,
    pub layer_order: Vec<LayerKind>,
}

impl Default for ImageSpec {
    fn default() -> Self {
        Self {
            builder_image: "rust:1.88.0-slim-bookworm".to_string(),
            runtime_image: "public.ecr.aws/lambda/provided:al2023".to_string(),
            workdir: "/app".to_string(),
            manifests: vec!["Cargo.toml".to_string(), LOCKFILE.to_string()],
            locked: true,
            source_dir: "src".to_string(),
            models_dir: "models".to_string(),
            binary: "lambda".to_string(),
            features: vec!["lambda".to_string()],
            entrypoint: "/app/bootstrap".to_string(),
            handler: DEFAULT_HANDLER.to_string(),
            default_function: "make_predictions".to_string(),
            layer_order: vec![
                LayerKind::Manifest,
                LayerKind::Dependencies,
                LayerKind::Source,
                LayerKind::Models,
            ],
        }
    }
}

const BUILD_DIR: &str = "/build";
const LOCKFILE: &str = "Cargo.lock";

/// Dependencies after the manifest; source and models after dependencies.
/// Each layer exactly once.
pub fn validate_layer_order(order: &[LayerKind]) -> Result<()> {
    let position = |kind: LayerKind| -> Result<usize> {
        let mut found = order.iter().enumerate().filter(|(_, k)| **k == kind);
        let (idx, _) = found
            .next()
            .ok_or_else(|| AppError::validation(format!("layer '{}' is missing", kind)))?;
        if found.next().is_some() {
            return Err(AppError::validation(format!("layer '{}' appears twice", kind)));
        }
        Ok(idx)
    };

    let manifest = position(LayerKind::Manifest)?;
    let dependencies = position(LayerKind::Dependencies)?;
    let source = position(LayerKind::Source)?;
    let models = position(LayerKind::Models)?;

    if dependencies < manifest {
        return Err(AppError::validation(
            "dependencies are installed before the manifest is copied",
        ));
    }
    for (kind, idx) in [(LayerKind::Source, source), (LayerKind::Models, models)] {
        if idx < dependencies {
            return Err(AppError::validation(format!(
                "layer '{}' precedes dependency installation",
                kind
            )));
        }
    }
    Ok(())
}

/// `name:tag` where the tag starts with `major.minor`, e.g. `rust:1.88.0-slim`.
fn validate_pinned_image(field: &str, image: &str) -> Result<()> {
    let tag = image
        .rsplit_once(':')
        .map(|(_, tag)| tag)
        .filter(|tag| !tag.contains('/'))
        .unwrap_or("");
    let mut parts = tag.split(|c: char| c == '.' || c == '-');
    let numeric = |p: Option<&str>| p.is_some_and(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    if numeric(parts.next()) && numeric(parts.next()) {
        Ok(())
    } else {
        Err(AppError::validation(format!(
            "{} must be pinned to a versioned tag, got '{}'",
            field, image
        )))
    }
}

impl ImageSpec {
    fn dir(path: &str) -> String {
        format!("{}/", path.trim_end_matches('/'))
    }

    /// Stand-in targets compiled in the dependency layer.
    fn stub_targets(&self) -> [String; 3] {
        let src = &self.source_dir;
        [
            format!("{}/main.rs", src),
            format!("{}/{}.rs", src, self.binary),
            format!("{}/lib.rs", src),
        ]
    }

    /// The release build of the bootstrap binary.
    pub fn build_command(&self) -> String {
        let mut cmd = String::from("cargo build --release");
        if self.locked {
            cmd.push_str(" --locked");
        }
        if !self.features.is_empty() {
            let _ = write!(cmd, " --features {}", self.features.join(","));
        }
        let _ = write!(cmd, " --bin {}", self.binary);
        cmd
    }

    fn layer(&self, kind: LayerKind) -> Layer {
        match kind {
            LayerKind::Manifest => Layer {
                kind,
                inputs: self.manifests.clone(),
                instruction: format!("COPY {} ./", self.manifests.join(" ")),
            },
            LayerKind::Dependencies => {
                // 以空白原始碼先編譯所有依賴
                let [main, bin, lib] = self.stub_targets();
                let instruction = format!(
                    "RUN mkdir -p {src} \\\n    && echo 'fn main() {{}}' > {main} \\\n    && echo 'fn main() {{}}' > {bin} \\\n    && touch {lib} \\\n    && {cmd}",
                    src = self.source_dir,
                    main = main,
                    bin = bin,
                    lib = lib,
                    cmd = self.build_command()
                );
                Layer {
                    kind,
                    inputs: Vec::new(),
                    instruction,
                }
            }
            LayerKind::Source => Layer {
                kind,
                inputs: vec![self.source_dir.clone()],
                instruction: format!(
                    "COPY {} ./{}",
                    Self::dir(&self.source_dir),
                    Self::dir(&self.source_dir)
                ),
            },
            LayerKind::Models => Layer {
                kind,
                inputs: vec![self.models_dir.clone()],
                instruction: format!(
                    "COPY {} {}/{}",
                    Self::dir(&self.models_dir),
                    self.workdir.trim_end_matches('/'),
                    Self::dir(&self.models_dir)
                ),
            },
        }
    }

    /// Layers in build order.
    pub fn layers(&self) -> Vec<Layer> {
        self.layer_order.iter().map(|kind| self.layer(*kind)).collect()
    }

    /// The Dockerfile for this spec. `FUNCTION` picks the function the
    /// image serves.
    pub fn render_dockerfile(&self) -> Result<String> {
        self.validate()?;

        let mut out = String::new();

        // write! 到 String 不會失敗
        let _ = writeln!(out, "# syntax=docker/dockerfile:1");
        let _ = writeln!(out, "FROM {} AS builder", self.builder_image);
        let _ = writeln!(out, "WORKDIR {}", BUILD_DIR);

        let layers = self.layers();
        for layer in layers.iter().filter(|l| l.kind != LayerKind::Models) {
            let _ = writeln!(out, "{}", layer.instruction);
        }
        // COPY 保留來源的 mtime，需要更新才會重新編譯
        let _ = writeln!(
            out,
            "RUN touch {} \\\n    && {}",
            self.stub_targets().join(" "),
            self.build_command()
        );
        let _ = writeln!(out);

        let _ = writeln!(out, "FROM {}", self.runtime_image);
        let _ = writeln!(out, "ARG FUNCTION={}", self.default_function);
        let _ = writeln!(out, "ENV AQ_FUNCTION=${{FUNCTION}}");
        let _ = writeln!(out, "WORKDIR {}", self.workdir);
        let _ = writeln!(
            out,
            "COPY --from=builder {}/target/release/{} {}",
            BUILD_DIR, self.binary, self.entrypoint
        );
        for layer in layers.iter().filter(|l| l.kind == LayerKind::Models) {
            let _ = writeln!(out, "{}", layer.instruction);
        }
        let _ = writeln!(out, "ENTRYPOINT [\"{}\"]", self.entrypoint);
        let _ = writeln!(out, "CMD [\"{}\"]", self.handler);

        Ok(out)
    }
}

impl Validate for ImageSpec {
    fn validate(&self) -> Result<()> {
        validate_pinned_image("builder_image", &self.builder_image)?;
        validate_non_empty_string("runtime_image", &self.runtime_image)?;
        validate_non_empty_string("binary", &self.binary)?;
        if self.manifests.is_empty() {
            return Err(AppError::validation("at least one manifest file is required"));
        }
        for name in &self.manifests {
            validate_context_path("manifests", name)?;
        }
        if self.locked && !self.manifests.iter().any(|m| m == LOCKFILE) {
            return Err(AppError::validation(format!(
                "a locked build needs {} among the manifests",
                LOCKFILE
            )));
        }
        validate_context_path("source_dir", &self.source_dir)?;
        validate_context_path("models_dir", &self.models_dir)?;

        for (field, path) in [("workdir", &self.workdir), ("entrypoint", &self.entrypoint)] {
            if !path.starts_with('/') {
                return Err(AppError::validation(format!(
                    "{} must be an absolute path, got '{}'",
                    field, path
                )));
            }
        }
        self.handler.parse::<HandlerId>()?;
        HandlerId::new(&self.default_function, ENTRY_POINT)?;

        validate_layer_order(&self.layer_order)
    }
}
