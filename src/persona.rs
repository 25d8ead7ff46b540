//! Persona instruction and fixed reply texts

/// Process-wide persona instruction sent ahead of every utterance
pub const PERSONA_INSTRUCTION: &str = "あなたはアンパンマンみたいに優しく、元気で、子どもに話しかけるような口調で日本語だけで返答します。";

/// Prefix for the utterance part of a generation request
pub const UTTERANCE_PREFIX: &str = "利用者の発話: ";

/// Closing directive of a generation request
pub const REPLY_DIRECTIVE: &str = "利用者への返答を一つの短い段落で作成してください。";

/// Substituted for the reply when generation fails under the apologize policy
pub const APOLOGY_REPLY: &str =
    "ごめんね、うまく聞き取れなかったみたい。もう一回言ってくれるかな？";

/// A generation request: persona, then utterance, then directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub persona: String,
    pub utterance: String,
    pub directive: String,
}

impl Prompt {
    /// Build the standard request for a recognized transcript
    #[must_use]
    pub fn for_transcript(transcript: &str) -> Self {
        Self {
            persona: PERSONA_INSTRUCTION.to_string(),
            utterance: format!("{UTTERANCE_PREFIX}{transcript}"),
            directive: REPLY_DIRECTIVE.to_string(),
        }
    }

    /// Request parts in send order
    #[must_use]
    pub fn parts(&self) -> [&str; 3] {
        [&self.persona, &self.utterance, &self.directive]
    }

    /// The transcript this prompt was built from
    #[must_use]
    pub fn transcript(&self) -> &str {
        self.utterance
            .strip_prefix(UTTERANCE_PREFIX)
            .unwrap_or(&self.utterance)
    }
}

/// Reply used by the offline generator
#[must_use]
pub fn canned_reply(transcript: &str) -> String {
    format!(
        "まあまあ、{transcript}って言ったんだね！すごいね！\nわかったよ、がんばったね。もっと聞きたいことがあったら言ってね！"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_are_ordered() {
        let prompt = Prompt::for_transcript("こんにちは");
        let [persona, utterance, directive] = prompt.parts();
        assert_eq!(persona, PERSONA_INSTRUCTION);
        assert_eq!(utterance, "利用者の発話: こんにちは");
        assert_eq!(directive, REPLY_DIRECTIVE);
        assert_eq!(prompt.transcript(), "こんにちは");
    }

    #[test]
    fn canned_reply_echoes_transcript() {
        assert!(canned_reply("りんご").starts_with("まあまあ、りんごって言ったんだね"));
    }
}
