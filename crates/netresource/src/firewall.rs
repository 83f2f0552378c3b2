/// Baseline nftables ruleset loaded into every resource namespace.
///
/// Starts with `flush ruleset` so re-applying on each create converges to
/// the same state instead of stacking rules.
const DEFAULT_RULESET: &str = "\
flush ruleset

table inet filter {
    chain input {
        type filter hook input priority filter; policy accept;
        ct state invalid drop
    }

    chain forward {
        type filter hook forward priority filter; policy accept;
        ct state invalid drop
        ct state { established, related } accept
    }
}

table ip nat {
    chain postrouting {
        type nat hook postrouting priority srcnat; policy accept;
    }
}
";

pub fn default_ruleset() -> &'static str {
    DEFAULT_RULESET
}
