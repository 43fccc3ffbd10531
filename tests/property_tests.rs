//! Property tests for reconciliation and rewriting

use kv_remediate::grammar::LineMatch;
use kv_remediate::{reconcile, DesiredState, Grammar, LineRecord, Rewriter};
use proptest::prelude::*;

fn grammar() -> impl Strategy<Value = Grammar> {
    prop_oneof![
        Just(Grammar::OpenEquals),
        Just(Grammar::ClosedEquals),
        Just(Grammar::Space),
    ]
}

/// Lines drawn from a small key alphabet so desired keys collide with them.
fn line(grammar: Grammar) -> impl Strategy<Value = String> {
    let data = ("[a-d]", "[a-z0-9]{0,3}").prop_map(move |(k, v)| grammar.format_line(&k, &v));
    prop_oneof![
        4 => data,
        1 => "# [a-d] [a-z ]{0,6}".prop_map(|c| format!("{c}\n")),
        1 => Just("\n".to_string()),
        1 => ("[a-d]", "[a-z]{1,3}", "[a-z]{1,3}").prop_map(|(k, a, b)| format!("{k} {a} {b}\n")),
    ]
}

fn file(grammar: Grammar) -> impl Strategy<Value = String> {
    prop::collection::vec(line(grammar), 0..12).prop_map(|lines| lines.concat())
}

fn desired() -> impl Strategy<Value = DesiredState> {
    (
        prop::bool::ANY,
        prop::collection::btree_map("[a-d]", "[a-z0-9]{1,3}", 1..4),
        prop::collection::btree_map("[e-f]", prop::collection::vec("[a-z]{1,2}", 1..4), 0..2),
    )
        .prop_map(|(present, scalars, lists)| {
            let mut state = if present {
                DesiredState::present()
            } else {
                DesiredState::absent()
            };
            for (key, value) in scalars {
                state.insert(key, value);
            }
            for (key, values) in lists {
                state.insert(key, values);
            }
            state
        })
}

/// Lines the rewriter must never touch: comments, blanks and ambiguous lines.
fn untouchable(grammar: Grammar, record: &LineRecord) -> Vec<String> {
    record
        .iter()
        .filter(|line| !matches!(grammar.match_line(line), LineMatch::Data { .. }))
        .map(|line| line.trim_end_matches('\n').to_string())
        .collect()
}

proptest! {
    // `compliant_file_is_unchanged` filters out most generated inputs with
    // `prop_assume!`, so allow enough rejections to reach the default case count.
    #![proptest_config(ProptestConfig {
        max_global_rejects: 16384,
        ..ProptestConfig::default()
    })]

    #[test]
    fn fixed_file_reconciles_clean(
        (grammar, text) in grammar().prop_flat_map(|g| (Just(g), file(g))),
        state in desired(),
    ) {
        let lines = LineRecord::from_text(&text);
        let fixes = reconcile(&state, &lines, grammar).unwrap();
        let fixed = Rewriter::new(grammar).rewrite(&lines, &fixes);

        let again = reconcile(&state, &fixed, grammar).unwrap();
        prop_assert!(again.is_empty(), "second pass found {again}");
        prop_assert_eq!(Rewriter::new(grammar).rewrite(&fixed, &again), fixed);
    }

    #[test]
    fn rewrite_preserves_non_data_lines(
        (grammar, text) in grammar().prop_flat_map(|g| (Just(g), file(g))),
        state in desired(),
    ) {
        let lines = LineRecord::from_text(&text);
        let fixes = reconcile(&state, &lines, grammar).unwrap();
        let fixed = Rewriter::new(grammar).rewrite(&lines, &fixes);

        let mut before = untouchable(grammar, &lines);
        let after = untouchable(grammar, &fixed);
        if !fixes.fixables.is_empty() {
            before.push("# added by kv-remediate".to_string());
        }
        prop_assert_eq!(after, before);
    }

    #[test]
    fn compliant_file_is_unchanged(
        (grammar, text) in grammar().prop_flat_map(|g| (Just(g), file(g))),
        state in desired(),
    ) {
        let lines = LineRecord::from_text(&text);
        let fixes = reconcile(&state, &lines, grammar).unwrap();
        prop_assume!(fixes.is_empty());
        prop_assert_eq!(Rewriter::new(grammar).rewrite(&lines, &fixes), lines);
    }
}
