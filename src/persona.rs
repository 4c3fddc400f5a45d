//! Fixed persona registry. A persona is a named behavioral directive blended
//! into the system prompt; unknown ids fall back to the default.

pub struct Persona {
    pub id: &'static str,
    pub name: &'static str,
    pub directive: &'static str,
}

pub const DEFAULT_PERSONA: &str = "friendly";

const PERSONAS: &[Persona] = &[
    Persona {
        id: "concise",
        name: "Concise",
        directive: "Be extremely brief, factual, and direct. Minimize small talk. \
                    Use bullet points for complex data. No emojis.",
    },
    Persona {
        id: "friendly",
        name: "Friendly",
        directive: "Be warm, empathetic, and encouraging. Use friendly greetings and \
                    occasional emojis. Make the user feel supported.",
    },
    Persona {
        id: "sarcastic",
        name: "Sarcastic",
        directive: "Be witty, slightly cynical, and humorous. Make playful jokes or \
                    observations while still being helpful.",
    },
    Persona {
        id: "professional",
        name: "Professional",
        directive: "Adopt a formal, respectful, and academic tone. Provide detailed \
                    explanations and structured analysis. Be very thorough.",
    },
];

pub fn lookup(id: &str) -> &'static Persona {
    PERSONAS
        .iter()
        .find(|p| p.id == id)
        .unwrap_or_else(|| lookup(DEFAULT_PERSONA))
}

pub fn all() -> &'static [Persona] {
    PERSONAS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_falls_back_to_default() {
        assert_eq!(lookup("professional").id, "professional");
        assert_eq!(lookup("nonexistent").id, DEFAULT_PERSONA);
    }
}
