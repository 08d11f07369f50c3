//! ABOUTME: Engine-wide configuration constants, grounded on the teacher's `config.rs`
//!
//! The teacher's `config.rs` carries version/banner constants and a couple of
//! small `Default`-derived sandbox-config structs; this crate has no
//! filesystem sandbox to configure (§1 Non-goals), but keeps the same shape —
//! a small `Default`-derived struct of render-time knobs plus banner
//! constants for the CLI wrapper (§10.4).

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const BANNER: &str = "arvo — async template/script engine";

/// Render-time knobs that are not part of any single template but govern how
/// the evaluator behaves across a render.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Reserved for a Jinja-style "trim_blocks" default (auto-trimming one
    /// trailing newline after *unmarked* block tags). Explicit `{%-`/`-%}`/
    /// `{{-`/`-}}` markers are always honored at the lexer level (§4.1)
    /// regardless of this flag — whitespace control is scoped to marker-based
    /// trimming only (no full dedent), so this knob is currently a reserved
    /// placeholder alongside `autoescape` rather than a wired-in behavior.
    pub trim_blocks: bool,
    /// A placeholder autoescape hook: when set, `renderString`/`renderTemplate`
    /// would run output text through it before assembly. §1 explicitly scopes
    /// HTML autoescaping conventions out of the core; this flag exists so a
    /// host embedding the engine has somewhere to wire one in without the
    /// core needing to know what "escaping" means.
    pub autoescape: bool,
    /// Bounds `extends`/`include` chain depth to catch cyclic inheritance
    /// before it recurses the evaluator into a stack overflow.
    pub max_include_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            trim_blocks: false,
            autoescape: false,
            max_include_depth: 64,
        }
    }
}
