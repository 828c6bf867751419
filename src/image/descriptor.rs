//! Reads an existing Dockerfile back and checks the layer ordering and the
//! entrypoint configuration.

use super::{validate_layer_order, LayerKind};
use crate::runtime::{HandlerId, DEFAULT_HANDLER};
use crate::utils::error::{AppError, Result};

/// What a descriptor was found to contain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorReport {
    pub layers: Vec<LayerKind>,
    pub entrypoint: Vec<String>,
    pub handler: HandlerId,
    /// Default of `ARG FUNCTION`, the function the default command serves.
    pub default_function: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Instruction {
    line: usize,
    keyword: String,
    args: String,
}

/// Logical instructions: comments and blank lines dropped, `\` continuations joined.
fn instructions(text: &str) -> Vec<Instruction> {
    let mut out = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (no, raw) in text.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.starts_with('#') || (trimmed.is_empty() && pending.is_none()) {
            continue;
        }

        let (continues, body) = match trimmed.strip_suffix('\\') {
            Some(body) => (true, body.trim_end()),
            None => (false, trimmed),
        };
        let (start, mut joined) = pending.take().unwrap_or((no + 1, String::new()));
        if !joined.is_empty() && !body.is_empty() {
            joined.push(' ');
        }
        joined.push_str(body);

        if continues {
            pending = Some((start, joined));
            continue;
        }
        if let Some(inst) = split_instruction(start, &joined) {
            out.push(inst);
        }
    }
    if let Some((start, joined)) = pending {
        if let Some(inst) = split_instruction(start, &joined) {
            out.push(inst);
        }
    }
    out
}

fn split_instruction(line: usize, text: &str) -> Option<Instruction> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let (keyword, args) = text.split_once(char::is_whitespace).unwrap_or((text, ""));
    Some(Instruction {
        line,
        keyword: keyword.to_ascii_uppercase(),
        args: args.trim().to_string(),
    })
}

/// Exec-form (`["a", "b"]`) or shell-form arguments.
fn command_words(args: &str) -> Vec<String> {
    if args.starts_with('[') {
        if let Ok(words) = serde_json::from_str::<Vec<String>>(args) {
            return words;
        }
    }
    args.split_whitespace().map(str::to_string).collect()
}

/// COPY sources, with `--flag` options removed. `None` for copies from
/// another stage.
fn copy_sources(args: &str) -> Option<Vec<String>> {
    let words = command_words(args);
    if words.iter().any(|w| w.starts_with("--from")) {
        return None;
    }
    let mut paths: Vec<String> = words.into_iter().filter(|w| !w.starts_with("--")).collect();
    paths.pop();
    Some(
        paths
            .into_iter()
            .map(|p| p.trim_start_matches("./").trim_end_matches('/').to_string())
            .collect(),
    )
}

fn classify(inst: &Instruction) -> Option<LayerKind> {
    match inst.keyword.as_str() {
        "COPY" | "ADD" => {
            let sources = copy_sources(&inst.args)?;
            let is = |name: &str| sources.iter().any(|s| s == name);
            if sources.iter().any(|s| s.starts_with("Cargo.")) {
                Some(LayerKind::Manifest)
            } else if is("src") {
                Some(LayerKind::Source)
            } else if is("models") {
                Some(LayerKind::Models)
            } else {
                None
            }
        }
        "RUN" if invokes_cargo(&inst.args) => Some(LayerKind::Dependencies),
        _ => None,
    }
}

fn invokes_cargo(args: &str) -> bool {
    args.contains("cargo fetch") || args.contains("cargo build")
}

/// `FUNCTION=name` → `Some(Some("name"))`, bare `FUNCTION` → `Some(None)`.
fn function_arg(args: &str) -> Option<Option<String>> {
    let (name, default) = match args.split_once('=') {
        Some((name, default)) => (name, Some(default.trim().trim_matches('"'))),
        None => (args, None),
    };
    if name.trim() != "FUNCTION" {
        return None;
    }
    Some(default.filter(|d| !d.is_empty()).map(str::to_string))
}

/// Checks that the manifest is copied before dependencies are installed,
/// that source and models come after the install, and that the image has an
/// entrypoint and a valid default handler.
///
/// The first cargo step is the dependency layer; later ones compile the
/// application.
pub fn check_descriptor(text: &str) -> Result<DescriptorReport> {
    let mut layers = Vec::new();
    let mut entrypoint = None;
    let mut cmd = None;
    let mut default_function = None;

    for inst in instructions(text) {
        if let Some(kind) = classify(&inst) {
            if kind == LayerKind::Dependencies && layers.contains(&kind) {
                tracing::debug!("line {}: application build", inst.line);
                continue;
            }
            tracing::debug!("line {}: {} layer", inst.line, kind);
            layers.push(kind);
            continue;
        }
        match inst.keyword.as_str() {
            "ENTRYPOINT" => entrypoint = Some(command_words(&inst.args)),
            "CMD" => cmd = Some((inst.line, command_words(&inst.args))),
            "ARG" => {
                if let Some(default) = function_arg(&inst.args) {
                    default_function = default;
                }
            }
            _ => {}
        }
    }

    validate_layer_order(&layers)?;

    let entrypoint = entrypoint
        .filter(|words| !words.is_empty())
        .ok_or_else(|| AppError::validation("descriptor has no ENTRYPOINT"))?;

    let (line, words) = cmd.ok_or_else(|| AppError::validation("descriptor has no CMD"))?;
    let handler = words
        .first()
        .ok_or_else(|| AppError::validation(format!("CMD on line {} is empty", line)))?
        .parse::<HandlerId>()?;

    if handler.to_string() == DEFAULT_HANDLER && default_function.is_none() {
        return Err(AppError::validation(format!(
            "CMD {} needs a default for ARG FUNCTION",
            DEFAULT_HANDLER
        )));
    }

    Ok(DescriptorReport {
        layers,
        entrypoint,
        handler,
        default_function,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageSpec;

    #[test]
    fn test_rendered_descriptor_passes() {
        let text = ImageSpec::default().render_dockerfile().unwrap();
        let report = check_descriptor(&text).unwrap();
        assert_eq!(
            report.layers,
            vec![
                LayerKind::Manifest,
                LayerKind::Dependencies,
                LayerKind::Source,
                LayerKind::Models
            ]
        );
        assert_eq!(report.entrypoint, vec!["/app/bootstrap"]);
        assert_eq!(report.handler.to_string(), "lambda_function.lambda_handler");
        assert_eq!(report.default_function.as_deref(), Some("make_predictions"));
    }

    #[test]
    fn test_build_after_source_copy_is_not_a_dependency_layer() {
        // only the post-copy build compiles dependencies
        let text = "COPY Cargo.toml Cargo.lock ./\n\
COPY src/ ./src/\n\
RUN cargo build --release --locked --bin lambda\n\
COPY models/ /app/models/\n\
ARG FUNCTION=login\n\
ENTRYPOINT [\"/app/bootstrap\"]\n\
CMD [\"lambda_function.lambda_handler\"]\n";
        let err = check_descriptor(text).unwrap_err();
        assert!(err.to_string().contains("precedes dependency installation"));

        let fixed = text.replace(
            "COPY src/ ./src/\n",
            "RUN cargo build --release --locked --bin lambda\nCOPY src/ ./src/\n",
        );
        let report = check_descriptor(&fixed).unwrap();
        assert_eq!(report.layers.len(), 4);
        assert_eq!(report.default_function.as_deref(), Some("login"));
    }

    #[test]
    fn test_default_command_needs_function_default() {
        let base = "COPY Cargo.toml ./\nRUN cargo fetch\nCOPY src ./src\nCOPY models /app/models\n\
ENTRYPOINT [\"/app/bootstrap\"]\nCMD [\"lambda_function.lambda_handler\"]\n";
        assert!(check_descriptor(base).is_err());
        assert!(check_descriptor(&format!("ARG FUNCTION\n{}", base)).is_err());
        assert!(check_descriptor(&format!("ARG FUNCTION=\n{}", base)).is_err());
        assert!(check_descriptor(&format!("ARG FUNCTION=login\n{}", base)).is_ok());

        let explicit = base.replace("lambda_function.lambda_handler", "login.lambda_handler");
        assert!(check_descriptor(&explicit).unwrap().default_function.is_none());
    }

    #[test]
    fn test_continuations_are_joined() {
        let insts = instructions("RUN a \\\n    && b \\\n    && c\nCMD [\"x.y\"]\n");
        assert_eq!(insts.len(), 2);
        assert_eq!(insts[0].args, "a && b && c");
        assert_eq!(insts[1].line, 4);
    }

    #[test]
    fn test_source_before_install_is_rejected() {
        let text = "FROM rust:1 AS builder\n\
COPY Cargo.toml ./\n\
COPY src/ ./src/\n\
RUN cargo fetch\n\
FROM public.ecr.aws/lambda/provided:al2023\n\
COPY models/ /app/models/\n\
ENTRYPOINT [\"/app/bootstrap\"]\n\
CMD [\"lambda_function.lambda_handler\"]\n";
        let err = check_descriptor(text).unwrap_err();
        assert!(err.to_string().contains("source"));
    }

    #[test]
    fn test_missing_entrypoint_or_bad_handler() {
        let base = "COPY Cargo.toml ./\nRUN cargo fetch\nCOPY src ./src\nCOPY models /app/models\n";
        assert!(check_descriptor(&format!("{}CMD [\"a.b\"]\n", base)).is_err());
        assert!(check_descriptor(&format!(
            "{}ENTRYPOINT [\"/app/bootstrap\"]\nCMD [\"handler\"]\n",
            base
        ))
        .is_err());
        assert!(check_descriptor(&format!(
            "{}ARG FUNCTION=login\nENTRYPOINT /app/bootstrap\nCMD lambda_function.lambda_handler\n",
            base
        ))
        .is_ok());
    }
}
