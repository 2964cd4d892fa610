//! `--break-*` flags and the cut-point rule ids they enable

/// Rule module of the control-flow semantics
const CONTROL_FLOW: &str = "KMIR-CONTROL-FLOW";

/// Thunk construction rule
pub const THUNK_RULE: &str = "RT-DATA.thunk";

/// Stepping granularity requested on the command line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BreakFlags {
    pub on_calls: bool,
    pub on_function_calls: bool,
    pub on_intrinsic_calls: bool,
    pub on_thunk: bool,
    pub every_statement: bool,
    pub on_terminator_goto: bool,
    pub on_terminator_switch_int: bool,
    pub on_terminator_return: bool,
    pub on_terminator_call: bool,
    pub on_terminator_assert: bool,
    pub on_terminator_drop: bool,
    pub on_terminator_unreachable: bool,
    pub every_terminator: bool,
    pub every_step: bool,
}

fn control_flow<'a>(rules: &'a [&'a str]) -> impl Iterator<Item = String> + 'a {
    rules.iter().map(|r| format!("{}.{}", CONTROL_FLOW, r))
}

impl BreakFlags {
    /// Cut-point rule ids for these flags, in a fixed order
    pub fn cut_point_rules(&self) -> Vec<String> {
        let terminators = self.every_terminator || self.every_step;
        let mut rules = Vec::new();

        if self.on_thunk {
            rules.push(THUNK_RULE.to_string());
        }
        if self.every_statement || self.every_step {
            rules.extend(control_flow(&["execStmt", "execStmt.union"]));
        }
        if self.on_terminator_goto || terminators {
            rules.extend(control_flow(&["termGoto"]));
        }
        if self.on_terminator_switch_int || terminators {
            rules.extend(control_flow(&["termSwitchInt"]));
        }
        if self.on_terminator_return || terminators {
            rules.extend(control_flow(&[
                "termReturnSome",
                "termReturnNone",
                "endprogram-return",
                "endprogram-no-return",
            ]));
        }
        let calls = self.on_calls || self.on_terminator_call || terminators;
        if self.on_intrinsic_calls || calls {
            rules.extend(control_flow(&["termCallIntrinsic"]));
        }
        if self.on_function_calls || calls {
            rules.extend(control_flow(&["termCallFunction"]));
        }
        if self.on_terminator_assert || terminators {
            rules.extend(control_flow(&["termAssert"]));
        }
        if self.on_terminator_drop || terminators {
            rules.extend(control_flow(&["termDrop"]));
        }
        if self.on_terminator_unreachable || terminators {
            rules.extend(control_flow(&["termUnreachable"]));
        }
        rules
    }
}
