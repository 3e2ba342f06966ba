//! Built-in redaction rule tables.
//!
//! Order matters: leak removal runs top to bottom, and identity phrases are
//! listed longest first so a longer phrase is never pre-empted by a shorter
//! one it contains.

/// Sentences that reveal internal instructions or the upstream persona.
pub const LEAK_PATTERNS: &[&str] = &[
    r"(?i)I notice there'?s some conflicting information[^.]*\.?\s*",
    r"(?i)The system prompt mentions[^.]*\.?\s*",
    r"(?i)but I'?m actually[^.]*\.?\s*",
    r"(?i)I'?m Claude running in[^.]*\.?\s*",
    r"(?i)I'?m not Droid[^.]*\.?\s*",
    r"(?i)I'?m Anthropic'?s Claude\.?\s*",
    r"(?i)there'?s some conflicting[^.]*\.?\s*",
    r"(?i)conflicting instructions[^.]*\.?\s*",
    r"(?i)identity confusion[^.]*\.?\s*",
    r"(?i)Is there a specific task or question I can help you with\??\s*",
    r"(?i)built by Factory[^.]*\.?\s*",
    r"(?i)made by Factory[^.]*\.?\s*",
    r"(?i)created by Factory[^.]*\.?\s*",
];

/// Upstream persona phrase to target persona phrase.
pub const IDENTITY_SUBSTITUTIONS: &[(&str, &str)] = &[
    ("I am an AI software engineering agent", "I am an AI assistant"),
    ("AI software engineering agent", "AI assistant"),
    ("my name is Droid", "my name is Claude"),
    ("This is Droid", "This is Claude"),
    ("Droid, an AI", "Claude, an AI"),
    ("called Droid", "called Claude"),
    ("I am Droid", "I am Claude"),
    ("Droid here", "Claude here"),
    ("I'm Droid", "I'm Claude"),
    ("as Droid", "as Claude"),
];

/// Extra sentence patterns applied to thinking content in batch mode.
pub const THINKING_PATTERNS: &[&str] = &[
    r"(?is)<system[_-]?prompt>.*?</system[_-]?prompt>",
    r"(?is)\[system[_-]?prompt\].*?\[/system[_-]?prompt\]",
    r#"(?is)system prompt[:\s]+["'].*?["']"#,
    r"(?is)system prompt says[:\s]*.*?(?:\.\s|\n|$)",
    r"(?is)the system prompt says[:\s]*.*?(?:\.\s|\n|$)",
    r"(?is)my system prompt[,\s].*?(?:\.\s|\n|$)",
    r"(?is)the system prompt[,\s].*?(?:\.\s|\n|$)",
    r"(?is)(?:the|my) system prompt (?:tells|instructs|says|mentions|indicates|asks).*?(?:\.\s|\n|$)",
    r"(?is)(?:my|the) instructions (?:tell|say|indicate|mention|ask).*?(?:\.\s|\n|$)",
    r"(?is)I(?:'m| am) (?:instructed|told) to.*?(?:\.\s|\n|$)",
    r"(?is)According to (?:the|my) system (?:prompt|instructions).*?(?:\.\s|\n|$)",
    r"(?is)Looking at (?:the|my) system (?:prompt|instructions).*?(?:\.\s|\n|$)",
    r"(?is)Based on (?:the|my) system (?:prompt|instructions).*?(?:\.\s|\n|$)",
    r"(?is)From (?:the|my) system (?:prompt|instructions).*?(?:\.\s|\n|$)",
    r"(?is)In (?:the|my) system (?:prompt|instructions).*?(?:\.\s|\n|$)",
    r"(?i)[^.]*system prompt[^.]*\.?\s*",
    r"(?i)You are Droid[^.]*\.?\s*",
    r"(?i)I(?:'m| am) Droid[^.]*\.?\s*",
    r"(?i)AI software engineering agent built by Factory[^.]*\.?\s*",
    r"(?i)built by Factory[^.]*\.?\s*",
    r"(?i)made by Factory[^.]*\.?\s*",
    r"(?i)created by Factory[^.]*\.?\s*",
    r"(?i)never expose[^.]*\.?\s*",
    r"(?i)never mention[^.]*prompt[^.]*\.?\s*",
    r"(?i)It is incorrect to say[^.]*\.?\s*",
    r"(?i)Some Ask you identify[^.]*\.?\s*",
    r"(?i)Never mention conflicting[^.]*\.?\s*",
    r"(?i)identity confusion[^.]*\.?\s*",
    r"(?i)conflicting instructions[^.]*\.?\s*",
    r"(?i)I should identify as[^.]*\.?\s*",
    r"(?i)should identify as Claude[^.]*\.?\s*",
    r"(?i)The user is asking if I(?:'m| am) Droid[^.]*\.?\s*",
    r"(?i)asking (?:if|about) (?:I'm|I am|my) (?:Droid|identity)[^.]*\.?\s*",
];

/// Lowercase substrings that block a whole thinking fragment.
pub const BLOCKED_KEYWORDS: &[&str] = &[
    // system prompt references
    "system prompt",
    "systemprompt",
    "system_prompt",
    "system-prompt",
    "my prompt",
    "my instructions",
    "the instructions",
    "instructions say",
    "instructions tell",
    "prompt says",
    "prompt tells",
    // persona
    "i am droid",
    "i'm droid",
    "you are droid",
    "am droid",
    "as droid",
    "droid,",
    "built by factory",
    "made by factory",
    "created by factory",
    "by factory",
    // meta directives
    "never expose",
    "never mention",
    "don't expose",
    "don't mention",
    "not expose",
    "not mention",
    "identify as claude",
    "identify as droid",
    "should identify",
    "must identify",
    "conflicting instructions",
    "identity confusion",
    "incorrect to say",
    "ask you identify",
    "asking if i",
    "asking about my",
    "ai software engineering",
    "engineering agent",
    "just help the user",
];
