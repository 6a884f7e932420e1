use crate::types::ChannelId;

/// Map a signed channel hash onto one of `shard_count` shards.
///
/// Takes the absolute value before the modulo so negative hashes land in
/// `[0, shard_count)`. A zero shard count is treated as one.
pub fn partition(hash: i32, shard_count: usize) -> usize {
    (hash.unsigned_abs() as usize) % shard_count.max(1)
}

/// Shard that owns `channel`.
pub fn shard_for_channel(channel: &ChannelId, shard_count: usize) -> usize {
    partition(channel.hash_code(), shard_count)
}
