//! Tool policy: mutation classification plus mode and domain gates.
//!
//! Classification is heuristic by design — name tables and prefixes, kept as
//! pure functions so hosts can audit and tests can enumerate them. A tool is
//! allowed only when both gates pass.

use crate::traits::{ExecutionMode, TaskDomain};

/// Tools that mutate regardless of naming: shell/script execution, sub-agent
/// spawn/control, browser actions, sandbox/domain/wallet operations.
const ALWAYS_MUTATING: &[&str] = &[
    "terminal",
    "execute_command",
    "run_script",
    "spawn_agent",
    "stop_agent",
    "browser_action",
    "sandbox_execute",
    "register_domain",
    "wallet_transfer",
    "wallet_sign",
];

/// Shell/script execution tools, denied wholesale by the domain gate.
const SHELL_TOOLS: &[&str] = &["terminal", "execute_command", "run_script"];

/// Git subcommand tools that only observe state. Any other `git_` tool is
/// treated as mutating.
const READ_ONLY_GIT: &[&str] = &["git_status", "git_log", "git_diff", "git_show", "git_blame"];

const MUTATING_PREFIXES: &[&str] = &[
    "create_", "write_", "edit_", "delete_", "rename_", "move_", "copy_", "generate_", "publish_",
    "deploy_", "submit_", "approve_", "merge_", "rebase_", "revert_", "push_", "mint_", "airdrop_",
];

const READ_ONLY_PREFIXES: &[&str] = &[
    "read_", "list_", "get_", "search_", "find_", "inspect_", "check_", "task_", "web_",
];

/// Prefixes for sandbox, domain-registration, wallet, and payment tooling —
/// restricted outside code/operations domains.
const RESTRICTED_CAPABILITY_PREFIXES: &[&str] = &["sandbox_", "domain_", "wallet_", "x402_"];

/// Classify a tool name as mutating or read-only. The read-only prefix check
/// short-circuits before the mutating prefix table is consulted.
pub fn is_mutating_tool(name: &str) -> bool {
    if ALWAYS_MUTATING.contains(&name) {
        return true;
    }
    if RESTRICTED_CAPABILITY_PREFIXES
        .iter()
        .any(|p| name.starts_with(p))
    {
        return true;
    }
    if name.starts_with("git_") {
        return !READ_ONLY_GIT.contains(&name);
    }
    if READ_ONLY_PREFIXES.iter().any(|p| name.starts_with(p)) {
        return false;
    }
    if MUTATING_PREFIXES.iter().any(|p| name.starts_with(p)) {
        return true;
    }
    // Generic action tools and externally-integrated (MCP) tools default to
    // mutating: we cannot see what they do.
    if name.ends_with("_action") || name.starts_with("mcp_") {
        return true;
    }
    false
}

/// Outcome of one policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl PolicyDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: String) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

/// Resolve the effective execution mode. A conversation-mode hint of "chat"
/// or "think" normalizes to analyze when no explicit mode is set.
pub fn normalize_execution_mode(
    explicit: Option<ExecutionMode>,
    conversation_hint: Option<&str>,
) -> ExecutionMode {
    if let Some(mode) = explicit {
        return mode;
    }
    match conversation_hint
        .map(|h| h.trim().to_ascii_lowercase())
        .as_deref()
    {
        Some("chat") | Some("think") => ExecutionMode::Analyze,
        _ => ExecutionMode::Execute,
    }
}

fn mode_gate(name: &str, mode: ExecutionMode) -> PolicyDecision {
    if mode == ExecutionMode::Execute || !is_mutating_tool(name) {
        return PolicyDecision::allow();
    }
    match mode {
        ExecutionMode::Propose => PolicyDecision::deny(format!(
            "'{name}' is a mutating tool; propose mode only drafts actions. Execute mode is \
             required to run it."
        )),
        ExecutionMode::Analyze => PolicyDecision::deny(format!(
            "'{name}' is a mutating tool; analyze mode is read-only by design."
        )),
        ExecutionMode::Execute => unreachable!(),
    }
}

fn domain_gate(name: &str, domain: &TaskDomain) -> PolicyDecision {
    match domain {
        TaskDomain::Auto | TaskDomain::Code | TaskDomain::Operations => PolicyDecision::allow(),
        other => {
            if SHELL_TOOLS.contains(&name) {
                return PolicyDecision::deny(format!(
                    "'{name}' runs shell commands, which are not available for {other} tasks."
                ));
            }
            if name.starts_with("git_") && is_mutating_tool(name) {
                return PolicyDecision::deny(format!(
                    "'{name}' mutates a git repository; {other} tasks may only inspect git state."
                ));
            }
            if RESTRICTED_CAPABILITY_PREFIXES
                .iter()
                .any(|p| name.starts_with(p))
            {
                return PolicyDecision::deny(format!(
                    "'{name}' touches sandbox, domain-registration, wallet, or payment \
                     capabilities, which are restricted to code and operations tasks \
                     (current domain: {other})."
                ));
            }
            PolicyDecision::allow()
        }
    }
}

/// Evaluate both gates for one tool. Allowed only if both pass; the first
/// denial wins and carries the explanation.
pub fn evaluate_tool_policy(
    name: &str,
    mode: ExecutionMode,
    domain: &TaskDomain,
) -> PolicyDecision {
    let by_mode = mode_gate(name, mode);
    if !by_mode.allowed {
        return by_mode;
    }
    domain_gate(name, domain)
}

/// A tool removed from the candidate list, with the denial reason for
/// display/audit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedTool {
    pub name: String,
    pub reason: String,
}

/// Partition a candidate tool list into allowed names and blocked entries.
pub fn filter_tools_by_policy(
    tools: &[String],
    mode: ExecutionMode,
    domain: &TaskDomain,
) -> (Vec<String>, Vec<BlockedTool>) {
    let mut allowed = Vec::new();
    let mut blocked = Vec::new();
    for name in tools {
        let decision = evaluate_tool_policy(name, mode, domain);
        if decision.allowed {
            allowed.push(name.clone());
        } else {
            blocked.push(BlockedTool {
                name: name.clone(),
                reason: decision
                    .reason
                    .unwrap_or_else(|| "blocked by policy".to_string()),
            });
        }
    }
    (allowed, blocked)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_mutating_action_and_mcp_tools_are_gated_by_mode() {
        let names = [
            "terminal",
            "spawn_agent",
            "browser_action",
            "wallet_transfer",
            "custom_action",
            "mcp_notion_update",
        ];
        for name in names {
            for mode in [ExecutionMode::Propose, ExecutionMode::Analyze] {
                let decision = evaluate_tool_policy(name, mode, &TaskDomain::Auto);
                assert!(!decision.allowed, "{name} should be denied under {mode:?}");
                assert!(decision.reason.is_some());
            }
            let decision = evaluate_tool_policy(name, ExecutionMode::Execute, &TaskDomain::Auto);
            assert!(decision.allowed, "{name} should be allowed under execute");
        }
    }

    #[test]
    fn read_only_prefix_short_circuits_before_mutating_table() {
        assert!(!is_mutating_tool("read_file"));
        assert!(!is_mutating_tool("web_search"));
        assert!(!is_mutating_tool("task_status"));
        // A read-only prefix wins even when the suffix looks action-like.
        assert!(!is_mutating_tool("check_action"));
        assert!(is_mutating_tool("create_document"));
        assert!(is_mutating_tool("push_branch"));
    }

    #[test]
    fn git_tools_split_into_read_only_and_mutating() {
        assert!(!is_mutating_tool("git_status"));
        assert!(!is_mutating_tool("git_diff"));
        assert!(is_mutating_tool("git_commit"));
        assert!(is_mutating_tool("git_push"));
    }

    #[test]
    fn restricted_domains_deny_shell_git_and_wallet_tools() {
        let research = TaskDomain::Research;
        for name in ["terminal", "git_commit", "wallet_transfer", "x402_pay", "sandbox_run"] {
            let decision = evaluate_tool_policy(name, ExecutionMode::Execute, &research);
            assert!(!decision.allowed, "{name} should be denied for research");
            assert!(decision.reason.as_deref().unwrap().contains("research"));
        }
        // Plain file creation stays available outside code/operations.
        assert!(evaluate_tool_policy("create_document", ExecutionMode::Execute, &research).allowed);
        assert!(evaluate_tool_policy("git_log", ExecutionMode::Execute, &research).allowed);
    }

    #[test]
    fn conversation_hint_normalizes_to_analyze_without_explicit_mode() {
        assert_eq!(
            normalize_execution_mode(None, Some("chat")),
            ExecutionMode::Analyze
        );
        assert_eq!(
            normalize_execution_mode(None, Some("think")),
            ExecutionMode::Analyze
        );
        // Hints arrive in whatever casing the host stored them.
        assert_eq!(
            normalize_execution_mode(None, Some("Chat")),
            ExecutionMode::Analyze
        );
        assert_eq!(
            normalize_execution_mode(None, Some(" THINK ")),
            ExecutionMode::Analyze
        );
        assert_eq!(normalize_execution_mode(None, None), ExecutionMode::Execute);
        assert_eq!(
            normalize_execution_mode(Some(ExecutionMode::Propose), Some("chat")),
            ExecutionMode::Propose
        );
    }

    #[test]
    fn filter_partitions_allowed_and_blocked_with_reasons() {
        let tools: Vec<String> = ["read_file", "terminal", "create_document", "git_status"]
            .into_iter()
            .map(String::from)
            .collect();
        let (allowed, blocked) =
            filter_tools_by_policy(&tools, ExecutionMode::Analyze, &TaskDomain::Auto);
        assert_eq!(allowed, vec!["read_file".to_string(), "git_status".to_string()]);
        let blocked_names: Vec<&str> = blocked.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(blocked_names, vec!["terminal", "create_document"]);
        assert!(blocked.iter().all(|b| !b.reason.is_empty()));
    }
}
