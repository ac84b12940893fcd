//! Command tokenizer.
//!
//! Splits a raw command line into word, special, and quoted-string tokens.
//! Words absorb a trailing period only when the dictionary actually knows
//! the dotted form (abbreviations like "mr."); adjacent words named in the
//! compound table are glued into their replacement; sentence punctuation
//! becomes THEN/AND specials so the command loop can split multi-command
//! input.

use crate::vocab::{VocabCtx, WordKey, PRP_ADJ, PRP_NOUN};

/// Special-token codes.  Stable: the save format never sees these, but the
/// special-word table in a game file maps text onto them by position.
pub const VOCW_AND: u8 = 1;
pub const VOCW_THEN: u8 = 2;
pub const VOCW_OF: u8 = 3;
pub const VOCW_ALL: u8 = 4;
pub const VOCW_BOTH: u8 = 5;
pub const VOCW_BUT: u8 = 6;
pub const VOCW_IT: u8 = 7;
pub const VOCW_THEM: u8 = 8;
pub const VOCW_HIM: u8 = 9;
pub const VOCW_HER: u8 = 10;
pub const VOCW_ANY: u8 = 11;
pub const VOCW_ONE: u8 = 12;
pub const VOCW_ONES: u8 = 13;

/// Built-in special words, used when the game file carries no SPECWORD
/// table of its own.
pub const DEFAULT_SPECIALS: &[(u8, &[u8])] = &[
    (VOCW_OF, b"of"),
    (VOCW_AND, b"and"),
    (VOCW_THEN, b"then"),
    (VOCW_ALL, b"all"),
    (VOCW_ALL, b"everything"),
    (VOCW_BOTH, b"both"),
    (VOCW_BUT, b"but"),
    (VOCW_BUT, b"except"),
    (VOCW_IT, b"it"),
    (VOCW_THEM, b"them"),
    (VOCW_HIM, b"him"),
    (VOCW_HER, b"her"),
    (VOCW_ANY, b"any"),
    (VOCW_ANY, b"either"),
    (VOCW_ONE, b"one"),
    (VOCW_ONES, b"ones"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Word(Vec<u8>),
    /// A special keyword; the original text is kept for display and for
    /// rebuilding token lists.
    Special { code: u8, text: Vec<u8> },
    Quoted(Vec<u8>),
}

impl Token {
    /// The token's text as the parser built-ins hand it back to scripts.
    pub fn text(&self) -> &[u8] {
        match self {
            Token::Word(t) => t,
            Token::Special { text, .. } => text,
            Token::Quoted(t) => t,
        }
    }

    pub fn special_code(&self) -> Option<u8> {
        match self {
            Token::Special { code, .. } => Some(*code),
            _ => None,
        }
    }
}

fn is_word_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'-'
}

fn is_word_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'\'' || c == b'-'
}

/// Look up a word in the special table (game-supplied, else built-in).
/// `cvt_ones` controls whether "one"/"ones" convert; they stay ordinary
/// words during noun-phrase parsing.  OF never converts here; it is
/// handled as a preposition by the phrase parser.
fn special_for(voc: &VocabCtx, word: &[u8], cvt_ones: bool) -> Option<u8> {
    let check = |code: u8| -> Option<u8> {
        if code == VOCW_OF {
            return None;
        }
        if !cvt_ones && (code == VOCW_ONE || code == VOCW_ONES) {
            return None;
        }
        Some(code)
    };
    if !voc.specials.is_empty() {
        for (code, text) in &voc.specials {
            if text.as_slice() == word {
                return check(*code);
            }
        }
        None
    } else {
        for (code, text) in DEFAULT_SPECIALS {
            if *text == word {
                return check(*code);
            }
        }
        None
    }
}

/// Tokenize a command line.  Returns the token list, or the offending
/// byte when the input contains punctuation the tokenizer cannot place.
pub fn tokenize(voc: &VocabCtx, cmd: &[u8], cvt_ones: bool) -> Result<Vec<Token>, u8> {
    let mut tokens: Vec<Token> = Vec::new();
    let mut i = 0;

    while i < cmd.len() {
        let c = cmd[i];
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        if is_word_start(c) || c.is_ascii_digit() {
            let start = i;
            while i < cmd.len() && is_word_char(cmd[i]) {
                i += 1;
            }
            let mut word: Vec<u8> = cmd[start..i].to_ascii_lowercase();

            // absorb a trailing period only for dictionary abbreviations
            if i < cmd.len() && cmd[i] == b'.' {
                let mut dotted = word.clone();
                dotted.push(b'.');
                let key = WordKey::one(&dotted);
                if !voc.objects_for(&key, PRP_NOUN).is_empty()
                    || !voc.objects_for(&key, PRP_ADJ).is_empty()
                {
                    word = dotted;
                    i += 1;
                }
            }

            // glue compound words together
            if let Some(Token::Word(prev)) = tokens.last() {
                if let Some((_, _, replacement)) = voc
                    .compounds
                    .iter()
                    .find(|(a, b, _)| a == prev && *b == word)
                {
                    let replacement = replacement.clone();
                    tokens.pop();
                    tokens.push(Token::Word(replacement));
                    continue;
                }
            }

            match special_for(voc, &word, cvt_ones) {
                Some(code) => tokens.push(Token::Special { code, text: word }),
                None => tokens.push(Token::Word(word)),
            }
            continue;
        }

        match c {
            b'.' | b'!' | b'?' | b';' => {
                tokens.push(Token::Special {
                    code: VOCW_THEN,
                    text: vec![c],
                });
                i += 1;
            }
            b',' | b':' => {
                tokens.push(Token::Special {
                    code: VOCW_AND,
                    text: vec![c],
                });
                i += 1;
            }
            b'"' | b'\'' => {
                let quote = c;
                i += 1;
                let mut text = Vec::new();
                while i < cmd.len() && cmd[i] != quote {
                    if cmd[i] == b'\\' {
                        text.push(b'\\');
                    }
                    text.push(cmd[i]);
                    i += 1;
                }
                if i < cmd.len() {
                    i += 1; // closing quote
                }
                tokens.push(Token::Quoted(text));
            }
            other => return Err(other),
        }
    }

    Ok(tokens)
}
