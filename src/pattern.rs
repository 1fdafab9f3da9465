// Glob-style subscription patterns.
//
// Grounded on examples/original_source/infod/match.c's `do_match`: a single
// recursive-descent-free scan over the pattern and the candidate key, with a
// small fixed-depth stack of `(a|b|c)` alternation frames. The original
// shares one engine between matching and pure syntax validation by passing a
// sentinel `CHECK` string pointer that every string-touching statement
// special-cases; here that's a plain `Option<&[u8]>` (`None` == validate
// only), which reads the same but needs no sentinel-pointer comparisons.
//
// One deliberate deviation: the original's `*\c` (escaped literal after a
// run wildcard) compares the run against the backslash byte itself rather
// than the escaped character, because it searches starting at the
// unresolved pattern cursor. That reads like an oversight rather than
// specified behavior, so this version searches for the resolved character.

const MAX_PAREN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidPattern;

struct Paren {
	start: usize,
	failed: bool,
	success: Option<usize>,
}

/// Returns whether the UTF-8 character at `a[ai]` equals the one at `b[bi]`.
/// Treats running off either slice's end as a non-match, the byte-slice
/// analogue of the original relying on a terminating NUL.
fn utf8_eq(a: &[u8], ai: usize, b: &[u8], bi: usize) -> bool {
	if ai >= a.len() || bi >= b.len() || a[ai] != b[bi] {
		return false;
	}
	if a[ai] & 0xc0 != 0xc0 {
		return true;
	}
	let (mut ai, mut bi) = (ai + 1, bi + 1);
	while ai < a.len() && bi < b.len() && (a[ai] & 0xc0) == 0x80 {
		if a[ai] != b[bi] {
			return false;
		}
		ai += 1;
		bi += 1;
	}
	true
}

/// Advances past one UTF-8 character starting at `s[i]`, or returns `i`
/// unchanged if already at the end.
fn utf8_advance(s: &[u8], i: usize) -> usize {
	if i >= s.len() {
		return i;
	}
	let mut j = i + 1;
	if s[i] & 0xc0 == 0xc0 {
		while j < s.len() && (s[j] & 0xc0) == 0x80 {
			j += 1;
		}
	}
	j
}

/// Shared engine behind `matches` and `is_valid`. `target == None` means
/// "validate syntax only": the pattern is scanned exactly as for a real
/// match, but no string position is ever read or advanced.
fn do_match(pattern: &[u8], target: Option<&[u8]>) -> Result<bool, InvalidPattern> {
	let mut pi = 0usize;
	let mut pos = 0usize;
	let mut parens: Vec<Paren> = Vec::with_capacity(MAX_PAREN);

	while pi < pattern.len() {
		let p = pattern[pi];
		pi += 1;

		match p {
			b'*' => match pattern.get(pi).copied() {
				Some(b'*') | Some(b'(') => return Err(InvalidPattern),
				None | Some(b'|') | Some(b')') => {
					if let Some(t) = target {
						pos = t.len();
					}
				}
				Some(b'?') => { /* "*?" is equivalent to "?" alone */ }
				Some(c) => {
					let needle = if c == b'\\' {
						if pattern.get(pi + 1).is_none() {
							return Err(InvalidPattern);
						}
						pi + 1
					} else {
						pi
					};
					if let Some(t) = target {
						while pos < t.len() && !utf8_eq(t, pos, pattern, needle) {
							pos = utf8_advance(t, pos);
						}
					}
				}
			},
			b'(' => {
				if parens.len() >= MAX_PAREN {
					return Err(InvalidPattern);
				}
				parens.push(Paren { start: pos, failed: false, success: None });
			}
			b'|' => {
				let depth = parens.len();
				if depth == 0 {
					return Err(InvalidPattern);
				}
				let paren = &mut parens[depth - 1];
				if !paren.failed && paren.success.is_none() {
					paren.success = Some(pos);
				}
				if target.is_some() {
					pos = paren.start;
				}
				paren.failed = false;
			}
			b')' => {
				let depth = parens.len();
				if depth == 0 {
					return Err(InvalidPattern);
				}
				{
					let paren = &mut parens[depth - 1];
					if !paren.failed && paren.success.is_none() {
						paren.success = Some(pos);
					}
				}
				if depth == 1 {
					match parens[0].success {
						Some(s) => {
							if target.is_some() {
								pos = s;
							}
						}
						None => return Ok(false),
					}
					parens.pop();
				} else {
					let success = parens[depth - 1].success;
					match success {
						Some(s) => {
							if target.is_some() {
								pos = s;
							}
						}
						None => parens[depth - 2].failed = true,
					}
					parens.pop();
				}
			}
			mut c => {
				let mut any = false;
				if c == b'\\' {
					match pattern.get(pi).copied() {
						Some(ch) => {
							c = ch;
							pi += 1;
						}
						None => return Err(InvalidPattern),
					}
				} else if c == b'?' {
					any = true;
				}
				if let Some(t) = target {
					let hit = if any { pos < t.len() } else { t.get(pos) == Some(&c) };
					if hit {
						pos = if any { utf8_advance(t, pos) } else { pos + 1 };
					} else if let Some(paren) = parens.last_mut() {
						paren.failed = true;
					} else {
						return Ok(false);
					}
				}
			}
		}
	}

	if !parens.is_empty() {
		return Err(InvalidPattern);
	}
	Ok(match target {
		None => true,
		Some(t) => pos == t.len(),
	})
}

/// Tests whether `key` matches `pattern`.
pub fn matches(pattern: &[u8], key: &[u8]) -> Result<bool, InvalidPattern> {
	do_match(pattern, Some(key))
}

/// Validates a pattern's syntax without matching it against anything.
pub fn is_valid(pattern: &[u8]) -> bool {
	do_match(pattern, None) == Ok(true)
}

#[cfg(test)]
mod test {
	use super::*;

	fn m(pattern: &str, key: &str) -> bool {
		matches(pattern.as_bytes(), key.as_bytes()).unwrap()
	}

	#[test]
	fn literal_requires_exact_match() {
		assert!(m("host.name", "host.name"));
		assert!(!m("host.name", "host.nam"));
		assert!(!m("host.name", "host.namee"));
	}

	#[test]
	fn question_mark_matches_one_codepoint() {
		assert!(m("host.?", "host.1"));
		assert!(!m("host.?", "host."));
		assert!(!m("host.?", "host.12"));
	}

	#[test]
	fn trailing_star_is_greedy() {
		assert!(m("host.*", "host."));
		assert!(m("host.*", "host.anything.goes"));
		assert!(!m("other.*", "host.anything"));
	}

	#[test]
	fn star_before_literal_runs_to_shortest_match() {
		assert!(m("*.conf", "etc/app.conf"));
		assert!(m("a*c", "abbbc"));
		assert!(!m("a*c", "abbbd"));
	}

	#[test]
	fn alternation_picks_any_branch() {
		assert!(m("host.(cpu|mem|disk)", "host.cpu"));
		assert!(m("host.(cpu|mem|disk)", "host.mem"));
		assert!(!m("host.(cpu|mem|disk)", "host.net"));
	}

	#[test]
	fn nested_alternation_up_to_four_levels() {
		assert!(m("(a(b|c)|d)", "ab"));
		assert!(m("(a(b|c)|d)", "ac"));
		assert!(m("(a(b|c)|d)", "d"));
		assert!(!m("(a(b|c)|d)", "ad"));
	}

	#[test]
	fn backslash_escapes_a_special_char() {
		assert!(m(r"100\%", "100%"));
		assert!(!m(r"100\%", "100x"));
		assert!(m(r"\*", "*"));
	}

	#[test]
	fn utf8_codepoints_count_as_one_char_for_question_mark() {
		assert!(m("caf\u{e9}?", "caf\u{e9}!")); // "é" is two UTF-8 bytes
	}

	#[test]
	fn is_valid_accepts_well_formed_patterns() {
		for p in ["a", "a*b", "(a|b)", "(a(b|c)|d)", "a\\*b", "*"] {
			assert!(is_valid(p.as_bytes()), "expected {:?} to be valid", p);
		}
	}

	#[test]
	fn is_valid_rejects_malformed_patterns() {
		for p in ["a|b", "(a", "a)", "**", "*(", "a\\"] {
			assert!(!is_valid(p.as_bytes()), "expected {:?} to be invalid", p);
		}
	}

	#[test]
	fn too_deeply_nested_alternation_is_invalid() {
		assert!(!is_valid(b"(a(b(c(d(e|f)|g)|h)|i)|j)"));
	}

	#[test]
	fn matching_a_malformed_pattern_errs() {
		assert_eq!(matches(b"**", b"anything"), Err(InvalidPattern));
	}

	// Property test for spec.md §8's invariant 8: `isvalid(p) = false`
	// implies `match(p, s) = false` for all `s`. Patterns are drawn from a
	// small alphabet biased toward the metacharacters `do_match` treats
	// specially, since uniformly random bytes would almost never exercise
	// `(`/`)`/`|`/`*` at all.
	mod proptest_pattern {
		use super::*;
		use proptest::prelude::*;

		fn arb_pattern_byte() -> impl Strategy<Value = u8> {
			prop_oneof![
				Just(b'*'),
				Just(b'?'),
				Just(b'('),
				Just(b')'),
				Just(b'|'),
				Just(b'\\'),
				Just(b'a'),
				Just(b'b'),
				Just(b'c'),
			]
		}

		proptest! {
			#![proptest_config(ProptestConfig::with_cases(256))]

			#[test]
			fn invalid_pattern_never_matches(
				pattern in proptest::collection::vec(arb_pattern_byte(), 0..10),
				key in proptest::collection::vec(arb_pattern_byte(), 0..10),
			) {
				if !is_valid(&pattern) {
					prop_assert_ne!(matches(&pattern, &key), Ok(true));
				}
			}

			/// A pattern that parses as valid never panics or errors when
			/// matched against arbitrary input, regardless of the outcome.
			#[test]
			fn valid_pattern_always_produces_a_verdict(
				pattern in proptest::collection::vec(arb_pattern_byte(), 0..10),
				key in proptest::collection::vec(arb_pattern_byte(), 0..10),
			) {
				if is_valid(&pattern) {
					prop_assert!(matches(&pattern, &key).is_ok());
				}
			}
		}
	}
}
