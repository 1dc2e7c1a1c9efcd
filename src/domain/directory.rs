//! Usage: Administrator lookup and broadcast recipient computation over a directory listing.

use crate::domain::graph::DirectoryUser;
use crate::infra::config::RecipientPolicy;
use std::collections::HashSet;

/// Case-insensitive exact match on principal name.
pub fn find_admin<'a>(users: &'a [DirectoryUser], admin_email: &str) -> Option<&'a DirectoryUser> {
    let wanted = admin_email.trim();
    if wanted.is_empty() {
        return None;
    }
    users
        .iter()
        .find(|user| user.principal_name.trim().eq_ignore_ascii_case(wanted))
}

/// Every directory principal except the administrator, followed by the
/// external addresses. With `KeepDuplicates` an address present in both lists
/// appears twice.
pub fn compute_recipients(
    users: &[DirectoryUser],
    admin_principal: &str,
    external: &[String],
    policy: RecipientPolicy,
) -> Vec<String> {
    let admin_principal = admin_principal.trim();
    let mut recipients: Vec<String> = users
        .iter()
        .map(|user| user.principal_name.trim())
        .filter(|name| !name.is_empty() && !name.eq_ignore_ascii_case(admin_principal))
        .map(str::to_string)
        .collect();
    recipients.extend(external.iter().cloned());

    if policy == RecipientPolicy::Deduplicate {
        let mut seen: HashSet<String> = HashSet::new();
        recipients.retain(|address| seen.insert(address.to_ascii_lowercase()));
    }
    recipients
}
