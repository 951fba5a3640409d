//! The `Partition` value type, node-name grammar, sort order, and
//! placement-group arithmetic (spec §3).

use regex::Regex;
use std::sync::OnceLock;

/// Non-HPC partitions are treated as a single unbounded placement group.
pub const UNBOUNDED_SCALESET_SIZE: u32 = 1 << 31;

#[derive(Debug, Clone)]
pub struct VirtualMachine {
    pub vcpu_count: u32,
    pub pcpu_count: Option<u32>,
    pub gpu_count: Option<u32>,
    pub memory_gib: f64,
}

impl VirtualMachine {
    pub fn pcpu_count(&self) -> u32 {
        self.pcpu_count.unwrap_or(self.vcpu_count)
    }

    pub fn gpu_count(&self) -> u32 {
        self.gpu_count.unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct Partition {
    pub name: String,
    pub nodearray: String,
    pub nodename_prefix: String,
    pub machine_type: String,
    pub is_default: bool,
    pub is_hpc: bool,
    pub max_scaleset_size: u32,
    pub vm: VirtualMachine,
    pub max_vm_count: u32,
    pub dampen_memory: f64,
    pub use_pcpu: bool,
    pub node_list: Option<String>,
}

impl Partition {
    pub fn vcpu_count(&self) -> u32 {
        self.vm.vcpu_count
    }

    pub fn pcpu_count(&self) -> u32 {
        self.vm.pcpu_count()
    }

    pub fn gpu_count(&self) -> u32 {
        self.vm.gpu_count()
    }

    pub fn memory_gib(&self) -> f64 {
        self.vm.memory_gib
    }

    pub fn num_placement_groups(&self) -> u32 {
        num_placement_groups(self.max_vm_count, self.max_scaleset_size)
    }
}

pub fn num_placement_groups(max_vm_count: u32, max_scaleset_size: u32) -> u32 {
    if max_scaleset_size == 0 {
        return 0;
    }
    ((max_vm_count as f64) / (max_scaleset_size as f64)).ceil() as u32
}

/// `[start, end)` into the sorted, pg-ordered node list for placement group
/// `pg_index`, clamped to `max_vm_count`.
pub fn placement_group_bounds(pg_index: u32, max_scaleset_size: u32, max_vm_count: u32) -> (usize, usize) {
    let start = (pg_index * max_scaleset_size) as usize;
    let end = (max_vm_count.min((pg_index + 1) * max_scaleset_size)) as usize;
    (start, end.max(start))
}

fn prefix_sanitizer() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("[^a-zA-Z0-9-]").unwrap())
}

/// Sanitizes `slurm.node_prefix` to `[a-z0-9-]`, lowercased; invalid
/// characters collapse to `-`. Returns `(sanitized, changed)`.
pub fn sanitize_prefix(raw: &str) -> (String, bool) {
    let collapsed = prefix_sanitizer().replace_all(raw, "-").to_lowercase();
    let changed = collapsed != raw;
    (collapsed, changed)
}

/// Case-insensitive `"true"` check, with `default` applying only when the
/// value is absent — mirroring the original's `str(val).lower() == "true"`.
pub fn parse_bool_default(raw: Option<&str>, default: bool) -> bool {
    match raw {
        None => default,
        Some(s) => s.eq_ignore_ascii_case("true"),
    }
}

/// HPC: `{prefix}{nodearray}-pg{pg_index}-{local_index}`
/// non-HPC: `{prefix}{nodearray}-{global_index}`
pub fn node_name(prefix: &str, nodearray: &str, is_hpc: bool, pg_index: u32, local_index: u32) -> String {
    if is_hpc {
        format!("{prefix}{nodearray}-pg{pg_index}-{local_index}")
    } else {
        format!("{prefix}{nodearray}-{local_index}")
    }
}

/// `name_format` with a `%d` placeholder for the Orchestrator's
/// name-offset-based bulk-creation request, e.g. `"prefix-nodearray-pg0-%d"`.
pub fn name_format(prefix: &str, nodearray: &str, is_hpc: bool, pg_index: u32) -> String {
    if is_hpc {
        format!("{prefix}{nodearray}-pg{pg_index}-%d")
    } else {
        format!("{prefix}{nodearray}-%d")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum SortKey {
    Numeric(i64),
    Lexical(String),
}

pub fn sort_key(name: &str, is_hpc: bool) -> SortKey {
    if is_hpc {
        hpc_sort_key(name)
    } else {
        non_hpc_sort_key(name)
    }
}

fn non_hpc_sort_key(name: &str) -> SortKey {
    match name.rsplit('-').next().and_then(|s| s.parse::<i64>().ok()) {
        Some(n) => SortKey::Numeric(n),
        None => SortKey::Lexical(name.to_string()),
    }
}

fn hpc_sort_key(name: &str) -> SortKey {
    let parts: Vec<&str> = name.split('-').collect();
    if parts.len() < 2 {
        return SortKey::Lexical(name.to_string());
    }
    let local = parts[parts.len() - 1].parse::<i64>().ok();
    let pg = parts[parts.len() - 2]
        .strip_prefix("pg")
        .and_then(|s| s.parse::<i64>().ok());
    match (pg, local) {
        (Some(pg), Some(local)) => SortKey::Numeric(pg * 100_000 + local),
        _ => SortKey::Lexical(name.to_string()),
    }
}

pub fn sort_names(names: &mut [String], is_hpc: bool) {
    names.sort_by_key(|n| sort_key(n, is_hpc));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_prefix_to_lowercase_dashed() {
        let (sanitized, changed) = sanitize_prefix("My_Prefix!");
        assert_eq!(sanitized, "my-prefix-");
        assert!(changed);
    }

    #[test]
    fn sanitize_prefix_noop_when_already_clean() {
        let (sanitized, changed) = sanitize_prefix("hpc-01");
        assert_eq!(sanitized, "hpc-01");
        assert!(!changed);
    }

    #[test]
    fn parse_bool_default_is_case_insensitive() {
        assert!(parse_bool_default(Some("TRUE"), false));
        assert!(!parse_bool_default(Some("False"), true));
        assert!(parse_bool_default(None, true));
    }

    #[test]
    fn hpc_node_names_follow_grammar() {
        assert_eq!(node_name("", "hpc", true, 0, 1), "hpc-pg0-1");
        assert_eq!(node_name("prod-", "hpc", true, 2, 13), "prod-hpc-pg2-13");
    }

    #[test]
    fn non_hpc_node_names_follow_grammar() {
        assert_eq!(node_name("", "htc", false, 0, 7), "htc-7");
    }

    #[test]
    fn hpc_sort_key_orders_by_pg_then_index() {
        let mut names = vec![
            "hpc-pg1-2".to_string(),
            "hpc-pg0-3".to_string(),
            "hpc-pg0-1".to_string(),
            "hpc-pg1-1".to_string(),
        ];
        sort_names(&mut names, true);
        assert_eq!(
            names,
            vec!["hpc-pg0-1", "hpc-pg0-3", "hpc-pg1-1", "hpc-pg1-2"]
        );
    }

    #[test]
    fn non_hpc_sort_key_orders_by_trailing_index() {
        let mut names = vec!["htc-10".to_string(), "htc-2".to_string(), "htc-1".to_string()];
        sort_names(&mut names, false);
        assert_eq!(names, vec!["htc-1", "htc-2", "htc-10"]);
    }

    #[test]
    fn malformed_names_fall_back_to_lexical_sort() {
        let mut names = vec!["zzz".to_string(), "aaa".to_string(), "htc-1".to_string()];
        sort_names(&mut names, false);
        assert_eq!(names, vec!["htc-1", "aaa", "zzz"]);
    }

    #[test]
    fn placement_group_counts_and_bounds() {
        assert_eq!(num_placement_groups(5, 3), 2);
        assert_eq!(placement_group_bounds(0, 3, 5), (0, 3));
        assert_eq!(placement_group_bounds(1, 3, 5), (3, 5));
    }

    #[test]
    fn non_hpc_has_one_unbounded_placement_group() {
        assert_eq!(num_placement_groups(2, UNBOUNDED_SCALESET_SIZE), 1);
    }
}
