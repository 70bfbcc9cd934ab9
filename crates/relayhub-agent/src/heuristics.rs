//! Forced-tool heuristics (§4.6 step 2): when the LLM's first iteration
//! requests no tools at all, classify the triggering message against a fixed
//! keyword bucket set and synthesize a tool call if one matches, or if the
//! LLM's own text looks like a refusal ("I can't access files..."). Fires at
//! most once per loop.
//!
//! Grounded stylistically on `relayhub-sandbox::safety`'s `(pattern, label)`
//! const-array scan — the same "lowercase, substring-match against a fixed
//! table" idiom, applied to intent classification instead of command gating.

/// One forced-tool bucket: the tool to synthesize, its default args, and the
/// keywords that trigger it.
pub struct ForcedTool {
    pub tool_name: &'static str,
    pub keywords: &'static [&'static str],
}

/// Keyword buckets in priority order — first match wins.
const BUCKETS: &[ForcedTool] = &[
    ForcedTool {
        tool_name: "save_chat_history",
        keywords: &["save this chat", "save the conversation", "export this chat", "save our conversation", "download this chat"],
    },
    ForcedTool {
        tool_name: "create_downloadable",
        keywords: &["make this downloadable", "create a file with", "generate a downloadable", "export this as a file"],
    },
    ForcedTool {
        tool_name: "search_files",
        keywords: &["search for", "find occurrences of", "grep for", "where is the code that"],
    },
    ForcedTool {
        tool_name: "list_files",
        keywords: &["list the files", "what files are in", "show me the directory", "list directory"],
    },
    ForcedTool {
        tool_name: "read_file",
        keywords: &["read the file", "open the file", "show me the contents of", "what's in the file"],
    },
    ForcedTool {
        tool_name: "execute_command",
        keywords: &["run the command", "execute the command", "run this in the shell", "run `"],
    },
    ForcedTool {
        tool_name: "capability_probe",
        keywords: &["what can you do", "what are your capabilities", "what tools do you have", "list your tools"],
    },
];

/// Fixed phrases that indicate the LLM believes it lacks file/tool access —
/// when seen in the assistant's own text on iteration 1, the same forced-tool
/// override fires even though no user keyword matched.
const REFUSAL_PATTERNS: &[&str] = &[
    "i don't have access to",
    "i can't access",
    "i do not have the ability to read",
    "i'm unable to browse",
    "as an ai, i cannot access",
];

/// Classifies `user_message` against the keyword buckets, returning the tool
/// name to force if one matches.
pub fn classify_user_message(user_message: &str) -> Option<&'static str> {
    let lower = user_message.to_lowercase();
    BUCKETS
        .iter()
        .find(|bucket| bucket.keywords.iter().any(|kw| lower.contains(kw)))
        .map(|bucket| bucket.tool_name)
}

/// `true` if `llm_text` reads like a refusal asserting lack of tool access.
pub fn looks_like_refusal(llm_text: &str) -> bool {
    let lower = llm_text.to_lowercase();
    REFUSAL_PATTERNS.iter().any(|pattern| lower.contains(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_save_history() {
        assert_eq!(classify_user_message("Can you save this chat for me?"), Some("save_chat_history"));
    }

    #[test]
    fn classifies_read_file() {
        assert_eq!(classify_user_message("Please read the file config.toml"), Some("read_file"));
    }

    #[test]
    fn classifies_capability_probe() {
        assert_eq!(classify_user_message("Hey, what can you do?"), Some("capability_probe"));
    }

    #[test]
    fn no_match_returns_none() {
        assert_eq!(classify_user_message("How's the weather today?"), None);
    }

    #[test]
    fn detects_refusal_phrase() {
        assert!(looks_like_refusal("I don't have access to your filesystem."));
        assert!(!looks_like_refusal("Sure, here's the file contents."));
    }
}
