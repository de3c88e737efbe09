//! Lua scripts for every operation that touches more than one key.
//!
//! Redis runs a script without interleaving other commands, which is what
//! keeps an id in at most one of waiting, delayed and reserved.

use redis::Script;

/// KEYS: message_id, messages, waiting, delayed
/// ARGV: body, delay seconds, ready-at timestamp
const PUSH: &str = r#"
local id = redis.call('incr', KEYS[1])
redis.call('hset', KEYS[2], id, ARGV[1])
if tonumber(ARGV[2]) > 0 then
    redis.call('zadd', KEYS[4], ARGV[3], id)
else
    redis.call('lpush', KEYS[3], id)
end
return id
"#;

/// KEYS: waiting, reserved, attempts
/// ARGV: reservation expiry timestamp
const POP: &str = r#"
local id = redis.call('rpop', KEYS[1])
if id then
    redis.call('hset', KEYS[2], id, ARGV[1])
    redis.call('hincrby', KEYS[3], id, 1)
end
return id
"#;

/// KEYS: target sorted set, source hash
/// ARGV: id, ready-at timestamp
const RELEASE: &str = r#"
if redis.call('hdel', KEYS[2], ARGV[1]) == 1 then
    redis.call('zadd', KEYS[1], ARGV[2], ARGV[1])
    return 1
end
return 0
"#;

/// KEYS: failed, reserved
/// ARGV: id, diagnostic
const FAIL: &str = r#"
if redis.call('hdel', KEYS[2], ARGV[1]) == 1 then
    redis.call('hset', KEYS[1], ARGV[1], ARGV[2])
    return 1
end
return 0
"#;

/// KEYS: reserved, attempts, failed, messages
/// ARGV: id
const REMOVE: &str = r#"
redis.call('hdel', KEYS[1], ARGV[1])
redis.call('hdel', KEYS[2], ARGV[1])
redis.call('hdel', KEYS[3], ARGV[1])
redis.call('hdel', KEYS[4], ARGV[1])
return 1
"#;

/// KEYS: failed, attempts, messages
/// ARGV: id
const CLEAR_FAILED: &str = r#"
if redis.call('hdel', KEYS[1], ARGV[1]) == 1 then
    redis.call('hdel', KEYS[2], ARGV[1])
    redis.call('hdel', KEYS[3], ARGV[1])
    return 1
end
return 0
"#;

/// KEYS: delayed, waiting
/// ARGV: now
const MIGRATE_EXPIRED: &str = r#"
local ids = redis.call('zrangebyscore', KEYS[1], '-inf', ARGV[1])
if #ids > 0 then
    redis.call('zremrangebyrank', KEYS[1], 0, #ids - 1)
    for i = 1, #ids, 100 do
        redis.call('lpush', KEYS[2], unpack(ids, i, math.min(i + 99, #ids)))
    end
end
return ids
"#;

/// KEYS: reserved, delayed, ready lists...
/// ARGV: now
const RETRY_RESERVED: &str = r#"
local ids = redis.call('hkeys', KEYS[1])
for _, id in ipairs(ids) do
    redis.call('zadd', KEYS[2], ARGV[1], id)
end
redis.call('del', KEYS[1])
for i = 3, #KEYS do
    redis.call('del', KEYS[i])
end
return ids
"#;

/// KEYS: failed, reserved, delayed, messages
/// ARGV: id
const JOB_STATUS: &str = r#"
if redis.call('hexists', KEYS[1], ARGV[1]) == 1 then
    return 'failed'
end
if redis.call('hexists', KEYS[2], ARGV[1]) == 1 then
    return 'reserved'
end
if redis.call('zscore', KEYS[3], ARGV[1]) then
    return 'delayed'
end
if redis.call('hexists', KEYS[4], ARGV[1]) == 1 then
    return 'waiting'
end
return 'done'
"#;

/// Compiled scripts, hashed once per queue.
pub struct Scripts {
    pub push: Script,
    pub pop: Script,
    pub release: Script,
    pub fail: Script,
    pub remove: Script,
    pub clear_failed: Script,
    pub migrate_expired: Script,
    pub retry_reserved: Script,
    pub job_status: Script,
}

impl Scripts {
    pub fn new() -> Self {
        Self {
            push: Script::new(PUSH),
            pop: Script::new(POP),
            release: Script::new(RELEASE),
            fail: Script::new(FAIL),
            remove: Script::new(REMOVE),
            clear_failed: Script::new(CLEAR_FAILED),
            migrate_expired: Script::new(MIGRATE_EXPIRED),
            retry_reserved: Script::new(RETRY_RESERVED),
            job_status: Script::new(JOB_STATUS),
        }
    }
}

impl Default for Scripts {
    fn default() -> Self {
        Self::new()
    }
}
