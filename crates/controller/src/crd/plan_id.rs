//! Plan identifiers derived from source revisions.

const HASH_LENGTH: usize = 10;

fn truncate(value: &str, max: usize) -> &str {
    match value.char_indices().nth(max) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

/// Derives the plan id for a source revision.
///
/// `main@sha1:b8e362c206e3` becomes `plan-main-b8e362c206`. The legacy
/// `main/b8e362c206e3` format maps the same way, and any other revision uses
/// its first ten characters.
pub fn plan_id(revision: &str) -> String {
    if let Some((branch, digest)) = revision.split_once('@') {
        if !digest.contains('@') {
            let hash = digest.split_once(':').map_or(digest, |(_, hash)| hash);
            return format!("plan-{branch}-{}", truncate(hash, HASH_LENGTH));
        }
    }

    let mut parts = revision.split('/');
    if let (Some(branch), Some(hash), None) = (parts.next(), parts.next(), parts.next()) {
        return format!("plan-{branch}-{}", truncate(hash, HASH_LENGTH));
    }

    format!("plan-{}", truncate(revision, HASH_LENGTH))
}

/// Message telling the user how to approve a pending plan
pub fn approve_message(plan_id: &str, message: &str) -> String {
    format!("{message}: set approvePlan: \"{plan_id}\" to approve this plan.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_id_branch_and_digest() {
        assert_eq!(
            plan_id("branch1@algo1:12345678901234567890"),
            "plan-branch1-1234567890"
        );
        assert_eq!(plan_id("branch3@algo3:123456789"), "plan-branch3-123456789");
    }

    #[test]
    fn test_plan_id_legacy_format() {
        assert_eq!(
            plan_id("master/b8e362c206e3d0cbb7ed22ced771a0056455a2fb"),
            "plan-master-b8e362c206"
        );
    }

    #[test]
    fn test_plan_id_plain_revision() {
        assert_eq!(plan_id("b8e362c206e3d0cbb7ed"), "plan-b8e362c206");
        assert_eq!(plan_id("short"), "plan-short");
        assert_eq!(plan_id("a/b/c"), "plan-a/b/c");
    }

    #[test]
    fn test_plan_id_digest_without_algorithm() {
        assert_eq!(plan_id("v1.0.0@0123456789abcdef"), "plan-v1.0.0-0123456789");
    }

    #[test]
    fn test_approve_message() {
        assert_eq!(
            approve_message("plan-main-abc", "Plan generated"),
            "Plan generated: set approvePlan: \"plan-main-abc\" to approve this plan."
        );
    }
}
