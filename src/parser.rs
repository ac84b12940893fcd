//! Noun-phrase resolution and disambiguation.
//!
//! The tokenizer produces tokens; this module turns them into object
//! candidates.  A noun phrase is a run of adjectives ending in an optional
//! noun; an object matches when it carries every word of the phrase under
//! a matching part of speech.  Disambiguation is deliberately first-found:
//! candidate filtering preserves match order, and the caller decides what
//! to do with residual ambiguity.

use log::trace;

use crate::tokenizer::{Token, VOCW_HER, VOCW_HIM, VOCW_IT, VOCW_THEM};
use crate::value::{ObjNum, OBJ_INVALID};
use crate::vocab::{
    VocabCtx, WordKey, VOCT_ADJ, VOCT_ARTICLE, VOCT_NOUN, VOCT_PLURAL, VOCT_SPEC, VOCT_UNKNOWN,
    PRP_ADJ, PRP_ARTICLE, PRP_NOUN, PRP_PLURAL,
};

/// Type bits for a single token.
pub fn token_types(voc: &VocabCtx, tok: &Token) -> u32 {
    match tok {
        Token::Special { .. } => VOCT_SPEC,
        Token::Quoted(_) => VOCT_UNKNOWN,
        Token::Word(text) => {
            let bits = voc.word_types(&WordKey::one(text));
            if bits == 0 {
                VOCT_UNKNOWN
            } else {
                bits
            }
        }
    }
}

/// Result of resolving one noun phrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Exactly one object matched.
    Unique(ObjNum),
    /// Several objects matched all the phrase words; the list keeps match
    /// order so first-found policies behave identically everywhere.
    Ambiguous(Vec<ObjNum>),
    /// A word in the phrase is not in the vocabulary.
    Unknown(Vec<u8>),
    /// The phrase matched no object.
    NoMatch,
}

#[derive(Debug, Clone)]
pub struct NounPhrase {
    pub objects: Resolution,
    /// Words consumed from the token stream.
    pub consumed: usize,
    /// The phrase words, for building "which do you mean" questions.
    pub words: Vec<Vec<u8>>,
}

fn intersect(current: Option<Vec<ObjNum>>, matches: Vec<ObjNum>) -> Vec<ObjNum> {
    match current {
        None => matches,
        Some(cur) => cur.into_iter().filter(|o| matches.contains(o)).collect(),
    }
}

/// Parse one noun phrase starting at `start`.  Pronoun specials resolve
/// straight from the bindings; otherwise adjectives accumulate and an
/// optional terminating noun completes the phrase.
pub fn parse_noun_phrase(voc: &VocabCtx, tokens: &[Token], start: usize) -> NounPhrase {
    let mut idx = start;
    let mut candidates: Option<Vec<ObjNum>> = None;
    let mut words: Vec<Vec<u8>> = Vec::new();

    // pronouns first
    if let Some(tok) = tokens.get(idx) {
        if let Some(code) = tok.special_code() {
            let resolved: Option<Resolution> = match code {
                VOCW_IT => Some(pronoun_resolution(voc.it)),
                VOCW_HIM => Some(pronoun_resolution(voc.him)),
                VOCW_HER => Some(pronoun_resolution(voc.her)),
                VOCW_THEM => Some(if voc.them.is_empty() {
                    Resolution::NoMatch
                } else {
                    Resolution::Ambiguous(voc.them.clone())
                }),
                _ => None,
            };
            if let Some(objects) = resolved {
                return NounPhrase {
                    objects,
                    consumed: 1,
                    words: vec![tok.text().to_vec()],
                };
            }
        }
    }

    while let Some(Token::Word(text)) = tokens.get(idx) {
        let key = WordKey::one(text);
        let bits = voc.word_types(&key);

        if bits & VOCT_ARTICLE != 0 && words.is_empty() {
            // leading article: consume without constraining the match
            idx += 1;
            continue;
        }

        if bits & (VOCT_NOUN | VOCT_PLURAL) != 0 {
            // a noun ends the phrase unless the next word continues it as
            // an adjective chain ("brass lamp post" style)
            let next_continues = matches!(tokens.get(idx + 1), Some(Token::Word(n))
                if voc.word_types(&WordKey::one(n)) & (VOCT_ADJ | VOCT_NOUN | VOCT_PLURAL) != 0);
            let use_adj = bits & VOCT_ADJ != 0 && next_continues;
            let pos = if use_adj {
                PRP_ADJ
            } else if bits & VOCT_NOUN != 0 {
                PRP_NOUN
            } else {
                PRP_PLURAL
            };
            candidates = Some(intersect(candidates, voc.objects_for(&key, pos)));
            words.push(text.clone());
            idx += 1;
            if !use_adj {
                break;
            }
        } else if bits & VOCT_ADJ != 0 {
            candidates = Some(intersect(candidates, voc.objects_for(&key, PRP_ADJ)));
            words.push(text.clone());
            idx += 1;
        } else if bits == 0 || bits == VOCT_UNKNOWN {
            // a word the dictionary has never heard of kills the phrase
            return NounPhrase {
                objects: Resolution::Unknown(text.clone()),
                consumed: idx + 1 - start,
                words,
            };
        } else {
            break;
        }
    }

    let objects = match candidates {
        None => Resolution::NoMatch,
        Some(list) => match list.len() {
            0 => Resolution::NoMatch,
            1 => Resolution::Unique(list[0]),
            _ => Resolution::Ambiguous(list),
        },
    };
    trace!("noun phrase {:?} -> {:?}", words, objects);
    NounPhrase {
        objects,
        consumed: idx - start,
        words,
    }
}

fn pronoun_resolution(obj: ObjNum) -> Resolution {
    if obj == OBJ_INVALID {
        Resolution::NoMatch
    } else {
        Resolution::Unique(obj)
    }
}

/// Narrow an ambiguous candidate list with a class filter, preserving
/// order; used by script-driven disambiguation.
pub fn filter_by_class(voc: &VocabCtx, candidates: &[ObjNum], cls: ObjNum) -> Vec<ObjNum> {
    candidates
        .iter()
        .copied()
        .filter(|o| voc.is_class(*o, cls))
        .collect()
}

/// A command parsed down to its object references.
#[derive(Debug, Clone, Default)]
pub struct ParsedCommand {
    pub verb_word: Vec<u8>,
    pub verb_objs: Vec<ObjNum>,
    pub dobj: Option<NounPhrase>,
    pub prep_word: Option<Vec<u8>>,
    pub prep_objs: Vec<ObjNum>,
    pub iobj: Option<NounPhrase>,
}

/// Parse a single command from a token stream: verb, optional direct
/// object phrase, optional preposition, optional indirect object phrase.
/// Returns None when the first word is not a verb.
pub fn parse_command(voc: &VocabCtx, tokens: &[Token]) -> Option<ParsedCommand> {
    let first = tokens.first()?;
    let Token::Word(verb_word) = first else {
        return None;
    };
    let verb_key = WordKey::one(verb_word);
    if voc.word_types(&verb_key) & crate::vocab::VOCT_VERB == 0 {
        return None;
    }

    let mut cmd = ParsedCommand {
        verb_word: verb_word.clone(),
        verb_objs: voc.objects_for(&verb_key, crate::vocab::PRP_VERB),
        ..Default::default()
    };

    let mut idx = 1;

    // two-word verb ("pick up") when the pair is in the dictionary
    if let Some(Token::Word(second)) = tokens.get(idx) {
        let two = WordKey::two(verb_word, second);
        let objs = voc.objects_for(&two, crate::vocab::PRP_VERB);
        if !objs.is_empty() {
            cmd.verb_objs = objs;
            let mut w = verb_word.clone();
            w.push(b' ');
            w.extend_from_slice(second);
            cmd.verb_word = w;
            idx += 1;
        }
    }

    if idx < tokens.len() {
        let np = parse_noun_phrase(voc, tokens, idx);
        if np.consumed > 0 {
            idx += np.consumed;
            cmd.dobj = Some(np);
        }
    }

    if let Some(Token::Word(text)) = tokens.get(idx) {
        let key = WordKey::one(text);
        if voc.word_types(&key) & crate::vocab::VOCT_PREP != 0 {
            cmd.prep_word = Some(text.clone());
            cmd.prep_objs = voc.objects_for(&key, crate::vocab::PRP_PREP);
            idx += 1;
            let np = parse_noun_phrase(voc, tokens, idx);
            if np.consumed > 0 {
                cmd.iobj = Some(np);
            }
        }
    }

    Some(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::tokenize;
    use crate::vocab::{PRP_PREP, PRP_VERB, VOCIF_CLASS};

    fn sample_vocab() -> VocabCtx {
        let mut voc = VocabCtx::new();
        voc.add_word(WordKey::one(b"take"), 100, PRP_VERB, 0);
        voc.add_word(WordKey::one(b"put"), 101, PRP_VERB, 0);
        voc.add_word(WordKey::one(b"in"), 102, PRP_PREP, 0);
        voc.add_word(WordKey::one(b"the"), 103, PRP_ARTICLE, 0);
        // two lamps distinguished by adjective
        voc.add_word(WordKey::one(b"lamp"), 10, PRP_NOUN, 0);
        voc.add_word(WordKey::one(b"brass"), 10, PRP_ADJ, 0);
        voc.add_word(WordKey::one(b"lamp"), 11, PRP_NOUN, 0);
        voc.add_word(WordKey::one(b"rusty"), 11, PRP_ADJ, 0);
        voc.add_word(WordKey::one(b"box"), 12, PRP_NOUN, 0);
        voc
    }

    #[test]
    fn adjective_narrows_noun() {
        let voc = sample_vocab();
        let toks = tokenize(&voc, b"brass lamp", false).unwrap();
        let np = parse_noun_phrase(&voc, &toks, 0);
        assert_eq!(np.objects, Resolution::Unique(10));
        assert_eq!(np.consumed, 2);
    }

    #[test]
    fn bare_noun_is_ambiguous_in_order() {
        let voc = sample_vocab();
        let toks = tokenize(&voc, b"lamp", false).unwrap();
        let np = parse_noun_phrase(&voc, &toks, 0);
        assert_eq!(np.objects, Resolution::Ambiguous(vec![10, 11]));
    }

    #[test]
    fn article_skipped() {
        let voc = sample_vocab();
        let toks = tokenize(&voc, b"the box", false).unwrap();
        let np = parse_noun_phrase(&voc, &toks, 0);
        assert_eq!(np.objects, Resolution::Unique(12));
        assert_eq!(np.consumed, 2);
    }

    #[test]
    fn unknown_word_reported() {
        let voc = sample_vocab();
        let toks = tokenize(&voc, b"brass zorkmid", false).unwrap();
        let np = parse_noun_phrase(&voc, &toks, 0);
        assert_eq!(np.objects, Resolution::Unknown(b"zorkmid".to_vec()));
    }

    #[test]
    fn pronoun_resolves_from_binding() {
        let mut voc = sample_vocab();
        voc.it = 11;
        let toks = tokenize(&voc, b"it", false).unwrap();
        let np = parse_noun_phrase(&voc, &toks, 0);
        assert_eq!(np.objects, Resolution::Unique(11));
        voc.it = OBJ_INVALID;
        let np = parse_noun_phrase(&voc, &toks, 0);
        assert_eq!(np.objects, Resolution::NoMatch);
    }

    #[test]
    fn full_command_with_preposition() {
        let voc = sample_vocab();
        let toks = tokenize(&voc, b"put brass lamp in box", false).unwrap();
        let cmd = parse_command(&voc, &toks).unwrap();
        assert_eq!(cmd.verb_objs, vec![101]);
        assert_eq!(cmd.dobj.as_ref().unwrap().objects, Resolution::Unique(10));
        assert_eq!(cmd.prep_word.as_deref(), Some(b"in".as_slice()));
        assert_eq!(cmd.iobj.as_ref().unwrap().objects, Resolution::Unique(12));
    }

    #[test]
    fn nonverb_first_word_rejected() {
        let voc = sample_vocab();
        let toks = tokenize(&voc, b"lamp take", false).unwrap();
        assert!(parse_command(&voc, &toks).is_none());
    }

    #[test]
    fn class_filter_preserves_order() {
        let mut voc = sample_vocab();
        voc.add_inh(90, VOCIF_CLASS, vec![], OBJ_INVALID);
        voc.add_inh(10, 0, vec![90], OBJ_INVALID);
        voc.add_inh(11, 0, vec![], OBJ_INVALID);
        let narrowed = filter_by_class(&voc, &[10, 11], 90);
        assert_eq!(narrowed, vec![10]);
    }
}
