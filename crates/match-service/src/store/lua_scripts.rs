//! Lua scripts for guarded Redis commits.
//!
//! Redis `WATCH` is scoped to a connection, and the store shares one
//! multiplexed connection across tasks, so optimistic transactions are
//! expressed as a single script: compare every guard, then write. Script
//! execution is atomic, so no other client observes a partial commit.

/// Guarded multi-key commit.
///
/// Arguments:
/// - KEYS[1..G]: Guarded keys
/// - KEYS[G+1..]: Written keys, one per write
/// - ARGV[1]: G, the number of guards
/// - ARGV[2..G+1]: Expected value per guard, `!` for "must be absent" or
///   `=` followed by the exact expected value
/// - Then three arguments per write: op (`SET` or `DEL`), value, TTL in
///   milliseconds (`0` for no expiry)
///
/// Returns:
/// - 1: All guards held, writes applied
/// - 0: A guard failed, nothing written
/// - -1: Malformed arguments
pub const GUARDED_COMMIT: &str = r#"
local guard_count = tonumber(ARGV[1])
if guard_count == nil then
    return -1
end

for i = 1, guard_count do
    local current = redis.call('GET', KEYS[i])
    local expected = ARGV[i + 1]
    if expected == '!' then
        if current then
            return 0
        end
    else
        if not current or ('=' .. current) ~= expected then
            return 0
        end
    end
end

local argi = guard_count + 2
for k = guard_count + 1, #KEYS do
    local op = ARGV[argi]
    if op == 'SET' then
        local ttl = tonumber(ARGV[argi + 2])
        if ttl ~= nil and ttl > 0 then
            redis.call('SET', KEYS[k], ARGV[argi + 1], 'PX', ttl)
        else
            redis.call('SET', KEYS[k], ARGV[argi + 1])
        end
    elseif op == 'DEL' then
        redis.call('DEL', KEYS[k])
    else
        return -1
    end
    argi = argi + 3
end

return 1
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guarded_commit_checks_absence_and_equality() {
        assert!(GUARDED_COMMIT.contains("expected == '!'"));
        assert!(GUARDED_COMMIT.contains("('=' .. current) ~= expected"));
    }

    #[test]
    fn test_guarded_commit_supports_ttl_and_delete() {
        assert!(GUARDED_COMMIT.contains("'PX'"));
        assert!(GUARDED_COMMIT.contains("redis.call('DEL', KEYS[k])"));
    }
}
