// The token-type graph: which token type may follow which.
//
// Each encoding strategy supplies the base edges of its grammar; the special
// tokens are layered on top in a fixed order:
// - start/end: `SOS` may be followed by any base type or by `EOS` directly,
//   every base type may be followed by `EOS`, and nothing content-bearing
//   follows `EOS`.
// - padding: every type may be followed by `PAD`, and `PAD` only by `PAD`
//   (or `MASK`).
// - mask: every type, special ones included, may be followed by `MASK`, and
//   `MASK` by every type.
//
// Validation is advisory. It walks a sequence of token types and reports the
// share of adjacent pairs the graph does not allow.

use crate::vocab::TokenType;
use std::collections::{BTreeMap, BTreeSet};

/// Directed adjacency over token types.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenTypeGraph {
    edges: BTreeMap<TokenType, BTreeSet<TokenType>>,
}

impl TokenTypeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow `from -> to` for every `to`. Registers `from` even when `to`
    /// is empty.
    pub fn add_edges(&mut self, from: TokenType, to: impl IntoIterator<Item = TokenType>) {
        self.edges.entry(from).or_default().extend(to);
    }

    pub fn allows(&self, from: TokenType, to: TokenType) -> bool {
        self.edges.get(&from).is_some_and(|next| next.contains(&to))
    }

    pub fn successors(&self, ty: TokenType) -> Option<&BTreeSet<TokenType>> {
        self.edges.get(&ty)
    }

    /// Every type with an entry in the graph.
    pub fn types(&self) -> impl Iterator<Item = TokenType> + '_ {
        self.edges.keys().copied()
    }

    /// Layer the enabled special tokens onto the base grammar.
    pub fn add_special_tokens(&mut self, pad: bool, sos_eos: bool, mask: bool) {
        let base: Vec<TokenType> = self.types().filter(|t| !t.is_special()).collect();

        if sos_eos {
            for ty in &base {
                self.add_edges(*ty, [TokenType::Eos]);
            }
            self.add_edges(
                TokenType::Sos,
                base.iter().copied().chain([TokenType::Eos]),
            );
            self.add_edges(TokenType::Eos, []);
        }

        if pad {
            let senders: Vec<TokenType> = self.types().collect();
            for ty in senders {
                self.add_edges(ty, [TokenType::Pad]);
            }
            self.add_edges(TokenType::Pad, [TokenType::Pad]);
        }

        if mask {
            self.add_edges(TokenType::Mask, []);
            let types: Vec<TokenType> = self.types().collect();
            for ty in &types {
                self.add_edges(*ty, [TokenType::Mask]);
            }
            self.add_edges(TokenType::Mask, types);
        }
    }

    /// Share of adjacent pairs in `types` that the graph does not allow.
    ///
    /// `None` marks a token with no known type and always counts as an
    /// error. Unless `consider_pad` is set, counting stops after the first
    /// transition into `PAD`. An empty sequence scores 0.
    pub fn errors(&self, types: &[Option<TokenType>], consider_pad: bool) -> f64 {
        let Some((&first, rest)) = types.split_first() else {
            return 0.0;
        };
        let mut errors = usize::from(first.is_none());
        let mut previous = first;
        for &current in rest {
            if !consider_pad && previous == Some(TokenType::Pad) {
                break;
            }
            match (previous, current) {
                (Some(from), Some(to)) if self.allows(from, to) => {}
                _ => errors += 1,
            }
            previous = current;
        }
        errors as f64 / types.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TokenType::*;

    fn tiny() -> TokenTypeGraph {
        let mut graph = TokenTypeGraph::new();
        graph.add_edges(Bar, [Position]);
        graph.add_edges(Position, [Pitch]);
        graph.add_edges(Pitch, [Position, Bar]);
        graph
    }

    #[test]
    fn valid_sequence_scores_zero() {
        let graph = tiny();
        let seq = [Some(Bar), Some(Position), Some(Pitch), Some(Bar)];
        assert_eq!(graph.errors(&seq, false), 0.0);
        assert_eq!(graph.errors(&[], false), 0.0);
    }

    #[test]
    fn every_bad_transition_counts() {
        let graph = tiny();
        let seq = [Some(Bar), Some(Pitch), Some(Bar), Some(Pitch)];
        // Bar->Pitch and Bar->Pitch are illegal, Pitch->Bar is fine
        assert_eq!(graph.errors(&seq, false), 2.0 / 4.0);
    }

    #[test]
    fn unknown_tokens_are_errors() {
        let graph = tiny();
        let seq = [Some(Bar), None, Some(Pitch)];
        assert_eq!(graph.errors(&seq, false), 2.0 / 3.0);
    }

    #[test]
    fn padding_stops_counting_unless_considered() {
        let mut graph = tiny();
        graph.add_special_tokens(true, false, false);
        let seq = [Some(Bar), Some(Position), Some(Pad), Some(Pitch), Some(Pitch)];
        assert_eq!(graph.errors(&seq, false), 0.0);
        assert_eq!(graph.errors(&seq, true), 2.0 / 5.0);
    }

    #[test]
    fn start_end_edges() {
        let mut graph = tiny();
        graph.add_special_tokens(true, true, false);
        assert!(graph.allows(Sos, Bar));
        assert!(graph.allows(Sos, Pitch));
        assert!(graph.allows(Sos, Eos));
        assert!(graph.allows(Pitch, Eos));
        assert!(!graph.allows(Eos, Bar));
        assert!(graph.allows(Eos, Pad));
        assert_eq!(graph.successors(Pad).map(|s| s.len()), Some(1));
    }

    #[test]
    fn mask_edges() {
        let mut graph = tiny();
        graph.add_special_tokens(false, true, true);
        assert!(graph.allows(Mask, Pitch));
        assert!(graph.allows(Mask, Mask));
        assert!(graph.allows(Mask, Eos));
        assert!(graph.allows(Sos, Mask));
        assert!(graph.allows(Bar, Mask));
        assert!(graph.allows(Eos, Mask));
        assert!(graph.allows(Mask, Sos));
        assert!(!graph.allows(Bar, Pad));
        assert!(!graph.allows(Mask, Pad));
    }

    #[test]
    fn mask_after_end_is_valid() {
        let mut graph = tiny();
        graph.add_special_tokens(false, true, true);
        let seq = [Some(Sos), Some(Bar), Some(Eos), Some(Mask)];
        assert_eq!(graph.errors(&seq, false), 0.0);
    }

    #[test]
    fn mask_and_pad_reach_each_other() {
        let mut graph = tiny();
        graph.add_special_tokens(true, true, true);
        assert!(graph.allows(Mask, Pad));
        assert!(graph.allows(Pad, Mask));
        assert!(graph.allows(Pad, Pad));
        assert!(!graph.allows(Pad, Bar));
        let seq = [Some(Mask), Some(Sos), Some(Pitch), Some(Mask), Some(Pad)];
        assert_eq!(graph.errors(&seq, true), 0.0);
    }
}
