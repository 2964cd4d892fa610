//! Existential quantification of right-hand-side-only variables

use crate::kast::{Rule, Term};

/// Wrap `rule.rhs` in one `#Exists` per variable that occurs only on the
/// right-hand side. Variables are sorted; the smallest is outermost.
pub fn quantify(mut rule: Rule) -> Rule {
    let mut bound = rule.lhs.free_vars();
    if let Some(cond) = &rule.requires {
        bound.extend(cond.free_vars());
    }
    let extra: Vec<String> = rule
        .rhs
        .free_vars()
        .into_iter()
        .filter(|v| !bound.contains(v))
        .collect();

    let mut rhs = rule.rhs;
    for name in extra.iter().rev() {
        rhs = Term::apply(
            "#Exists",
            vec![
                Term::Var {
                    name: name.clone(),
                    sort: None,
                },
                rhs,
            ],
        );
    }
    rule.rhs = rhs;
    rule
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kast::sort;

    #[test]
    fn test_only_rhs_vars_are_quantified_in_order() {
        let rule = Rule::new(
            "aux",
            Term::apply("f", vec![Term::var("X", sort::INT)]),
            Term::apply(
                "g",
                vec![
                    Term::var("X", sort::INT),
                    Term::var("Z", sort::INT),
                    Term::var("A", sort::INT),
                ],
            ),
        );
        let out = quantify(rule);
        assert_eq!(out.rhs.label(), Some("#Exists"));
        assert_eq!(out.rhs.args()[0], Term::Var { name: "A".into(), sort: None });
        let inner = &out.rhs.args()[1];
        assert_eq!(inner.args()[0], Term::Var { name: "Z".into(), sort: None });
        assert_eq!(inner.args()[1].label(), Some("g"));
    }

    #[test]
    fn test_closed_rule_unchanged() {
        let rule = Rule::new("c", Term::constant("a"), Term::constant("b"));
        assert_eq!(quantify(rule.clone()), rule);
    }
}
