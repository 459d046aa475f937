//! Splitting address sets into fixed-size groups and naming the remote objects.
//!
//! Group `i` always holds addresses `[i*N, min((i+1)*N, count))` of the
//! sorted address list, so re-batching the same set yields the same
//! chunk-to-address assignment and unchanged groups can be skipped.

use crate::decision::AddressFamily;

/// Prefix shared by every remote object this bouncer owns.
pub const NAME_PREFIX: &str = "cs-unifi-bouncer";

/// Number of groups needed for `count` addresses.
pub fn chunk_count(count: usize, max_group_size: usize) -> usize {
    if max_group_size == 0 {
        return 0;
    }
    count.div_ceil(max_group_size)
}

/// Sort addresses and split them into chunks of at most `max_group_size`.
pub fn batch<'a, I>(addresses: I, max_group_size: usize) -> Vec<Vec<String>>
where
    I: IntoIterator<Item = &'a String>,
{
    if max_group_size == 0 {
        return Vec::new();
    }

    let mut sorted: Vec<String> = addresses.into_iter().cloned().collect();
    sorted.sort_unstable();
    sorted.dedup();

    sorted
        .chunks(max_group_size)
        .map(<[String]>::to_vec)
        .collect()
}

/// Prefix of every object name of one family, e.g. `cs-unifi-bouncer-ipv4`.
pub fn family_prefix(family: AddressFamily) -> String {
    format!("{}-{}", NAME_PREFIX, family.label())
}

/// Name of the group (and legacy rule) at `index`.
pub fn group_name(family: AddressFamily, index: usize) -> String {
    format!("{}-{}", family_prefix(family), index)
}

/// Name of the zone policy for one zone pair at `index`.
pub fn policy_name(family: AddressFamily, zone_src: &str, zone_dst: &str, index: usize) -> String {
    format!("{}-{}->{}-{}", family_prefix(family), zone_src, zone_dst, index)
}

/// Family owning a remote object name, if the name belongs to this bouncer.
pub fn owner_family(name: &str) -> Option<AddressFamily> {
    AddressFamily::ALL
        .into_iter()
        .find(|family| name.starts_with(&family_prefix(*family)))
}
