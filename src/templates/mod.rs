//! Embedded templates for codeagent files.

/// Default `codeagent.toml` configuration.
pub(crate) const CODEAGENT_TOML: &str = include_str!("codeagent.toml");

/// `.env.example` listing the secrets read from the environment.
pub(crate) const ENV_EXAMPLE: &str = include_str!("env.example");

/// System instruction for the repair loop. `{sandbox}` is replaced.
const SYSTEM_PROMPT: &str = include_str!("system_prompt.md");

/// Renders the system instruction for a session bound to `sandbox`.
pub(crate) fn system_prompt(sandbox: &str) -> String {
    SYSTEM_PROMPT.replace("{sandbox}", sandbox)
}
