//! Admin command parsing and dispatch (spec §4.8).
//!
//! The recognised-command table and the plain `if trimmed == ... { return
//! Some(...) }` dispatch shape are grounded on
//! `skynet_telegram::handler::handle_local_command`'s `/clear` and
//! `/whoami` local-command handling; generalised here from two hardcoded
//! commands to a parsed `{command, args}` pair and a cross-platform prefix
//! grammar.

use chrono::Utc;
use std::time::Duration;

use relay_core::config::AdminsConfig;
use relay_core::types::Platform;
use relay_pool::AgentPool;
use relay_store::RelayStore;

use crate::abort::AbortRegistry;

/// The commands the admin handler recognises, independent of which prefix
/// (`/pilotlynx-`, `/pilotlynx `, `!`, or bare) was used to invoke them.
const KNOWN_COMMANDS: &[&str] = &["bind", "unbind", "status", "where", "help", "cancel", "new"];

/// Parse `text` into `(command, args)` if it matches one of the admin
/// invocation syntaxes noted in spec §4.3:
/// `/pilotlynx-<cmd> …`, `/pilotlynx <cmd> …`, `!<cmd> …`, or a bare
/// `<cmd> …` where `<cmd>` is in [`KNOWN_COMMANDS`].
pub fn parse_invocation(text: &str) -> Option<(String, Vec<String>)> {
    let trimmed = text.trim();

    if let Some(rest) = trimmed.strip_prefix("/pilotlynx-") {
        return Some(split_command(rest));
    }
    if let Some(rest) = trimmed.strip_prefix("/pilotlynx ") {
        return Some(split_command(rest));
    }
    if trimmed == "/pilotlynx" {
        return Some(("help".to_string(), Vec::new()));
    }
    if let Some(rest) = trimmed.strip_prefix('!') {
        if !rest.is_empty() {
            return Some(split_command(rest));
        }
    }

    let (first, _) = split_command(trimmed);
    if KNOWN_COMMANDS.contains(&first.as_str()) {
        return Some(split_command(trimmed));
    }

    None
}

fn split_command(rest: &str) -> (String, Vec<String>) {
    let mut parts = rest.split_whitespace();
    let command = parts.next().unwrap_or("").to_lowercase();
    let args = parts.map(str::to_string).collect();
    (command, args)
}

/// Context needed to execute a parsed admin command. Plain data, not a
/// trait object — there is exactly one admin handler, not a pluggable set.
pub struct AdminContext<'a> {
    pub store: &'a RelayStore,
    pub pool: &'a AgentPool,
    pub aborts: &'a AbortRegistry,
    pub admins: &'a AdminsConfig,
    pub platform: Platform,
    pub channel_id: &'a str,
    pub conversation_id: &'a str,
    pub user_id: &'a str,
    pub uptime: Duration,
}

const ADMIN_ONLY: &[&str] = &["bind", "unbind"];

/// Execute a parsed admin command and return the text reply to post.
pub fn dispatch(ctx: &AdminContext, command: &str, args: &[String]) -> String {
    if ADMIN_ONLY.contains(&command) && !ctx.admins.is_admin(ctx.platform, ctx.user_id) {
        return "Permission denied.".to_string();
    }

    match command {
        "bind" => bind(ctx, args),
        "unbind" => unbind(ctx),
        "status" => status(ctx),
        "where" => where_cmd(ctx),
        "help" => help(),
        "cancel" => cancel(ctx),
        "new" => new_thread(ctx),
        other => format!("Unknown command: {other}. Try `help`."),
    }
}

fn bind(ctx: &AdminContext, args: &[String]) -> String {
    let Some(project) = args.first() else {
        return "Usage: bind <project>".to_string();
    };
    let binding = relay_core::types::Binding {
        platform: ctx.platform,
        channel_id: ctx.channel_id.to_string(),
        project: project.clone(),
        bound_by: ctx.user_id.to_string(),
        bound_at: Utc::now(),
    };
    match ctx.store.save_binding(&binding) {
        Ok(()) => format!("Bound this channel to project `{project}`."),
        Err(e) => format!("Failed to bind: {e}"),
    }
}

fn unbind(ctx: &AdminContext) -> String {
    match ctx.store.delete_binding(ctx.platform, ctx.channel_id) {
        Ok(true) => "Unbound this channel.".to_string(),
        Ok(false) => "This channel wasn't bound to anything.".to_string(),
        Err(e) => format!("Failed to unbind: {e}"),
    }
}

fn status(ctx: &AdminContext) -> String {
    let active = ctx.pool.active_count();
    let uptime_secs = ctx.uptime.as_secs();
    match ctx.store.lookup_binding(ctx.platform, ctx.channel_id) {
        Ok(Some(binding)) => {
            let depth = ctx.pool.queue_depth(&binding.project);
            format!(
                "Active runs: {active} · uptime: {uptime_secs}s · `{}` queue depth: {depth}",
                binding.project
            )
        }
        Ok(None) => format!("Active runs: {active} · uptime: {uptime_secs}s · channel unbound"),
        Err(e) => format!("Active runs: {active} · uptime: {uptime_secs}s · (binding lookup failed: {e})"),
    }
}

fn where_cmd(ctx: &AdminContext) -> String {
    match ctx.store.lookup_binding(ctx.platform, ctx.channel_id) {
        Ok(Some(binding)) => format!("This channel is bound to project `{}`.", binding.project),
        Ok(None) => "This channel isn't bound to a project yet. Use `bind <project>`.".to_string(),
        Err(e) => format!("Failed to look up binding: {e}"),
    }
}

fn help() -> String {
    "Commands: bind <project> (admin), unbind (admin), status, where, help, cancel, new".to_string()
}

fn cancel(ctx: &AdminContext) -> String {
    if ctx.aborts.cancel(ctx.conversation_id) {
        "Cancelled your in-flight run.".to_string()
    } else {
        "Nothing in flight to cancel.".to_string()
    }
}

fn new_thread(ctx: &AdminContext) -> String {
    match ctx.store.purge_conversation(ctx.conversation_id) {
        Ok(_) => "Cleared conversation history. Starting fresh.".to_string(),
        Err(e) => format!("Failed to clear history: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pilotlynx_dash_prefix() {
        let (cmd, args) = parse_invocation("/pilotlynx-bind myproj").unwrap();
        assert_eq!(cmd, "bind");
        assert_eq!(args, vec!["myproj".to_string()]);
    }

    #[test]
    fn parses_pilotlynx_space_prefix() {
        let (cmd, args) = parse_invocation("/pilotlynx bind myproj").unwrap();
        assert_eq!(cmd, "bind");
        assert_eq!(args, vec!["myproj".to_string()]);
    }

    #[test]
    fn bare_pilotlynx_defaults_to_help() {
        let (cmd, args) = parse_invocation("/pilotlynx").unwrap();
        assert_eq!(cmd, "help");
        assert!(args.is_empty());
    }

    #[test]
    fn parses_bang_prefix() {
        let (cmd, args) = parse_invocation("!status").unwrap();
        assert_eq!(cmd, "status");
        assert!(args.is_empty());
    }

    #[test]
    fn parses_bare_known_command() {
        let (cmd, _) = parse_invocation("cancel").unwrap();
        assert_eq!(cmd, "cancel");
    }

    #[test]
    fn bare_unknown_word_is_not_a_command() {
        assert!(parse_invocation("hello there").is_none());
    }

    #[test]
    fn ordinary_chat_message_is_not_misparsed() {
        assert!(parse_invocation("can you help me debug this?").is_none());
    }
}
