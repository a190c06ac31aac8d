// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Atomic store scripts
//!
//! Each script is one indivisible step on the server. Timestamps are unix
//! milliseconds supplied by the caller; lock and queue JSON is the same
//! serde form the Rust model writes. Replies are JSON documents decoded by
//! `reply`.

use redis::Script;

/// Helpers shared by every lock script
///
/// A holder record outlives its `expires_at` by `grace` milliseconds so an
/// expired lock can still be released, cleaned up and handed to its queue.
const PRELUDE: &str = r#"
local function store_px(expires_at, now, grace)
    if expires_at then
        return math.max(expires_at - now, 1) + grace
    end
    return 0
end

local function put(key, value, px)
    if px > 0 then
        redis.call('SET', key, value, 'PX', px)
    else
        redis.call('SET', key, value)
    end
end

local function publish(channel, action, suffix, owner, lock_id, now, position)
    local event = {action = action, key = suffix, owner = owner, lock_id = lock_id, timestamp = now}
    if position then
        event.position = position
    end
    redis.call('PUBLISH', channel, cjson.encode(event))
end

local function is_expired(lock, now)
    return lock.expires_at ~= nil and lock.expires_at ~= cjson.null and lock.expires_at <= now
end

-- Pop the queue head and store it as the holder; returns the encoded lock
local function promote_head(queue_key, lock_key, index_prefix, suffix, now, grace)
    local head = redis.call('ZRANGE', queue_key, 0, 0)
    if #head == 0 then
        return nil
    end
    redis.call('ZREM', queue_key, head[1])
    local entry = cjson.decode(head[1])
    local request = entry.request
    local lock = {
        id = entry.lock_id,
        resource = request.resource,
        state = 'acquired',
        priority = request.priority,
        owner = request.owner,
        acquired_at = now,
        version = 1,
        metadata = request.metadata,
        request_id = request.id,
    }
    if request.timeout_ms and request.timeout_ms > 0 then
        lock.expires_at = now + request.timeout_ms
    end
    if request.original and request.original ~= cjson.null then
        lock.original_lock = request.original
    end
    local encoded = cjson.encode(lock)
    local px = store_px(lock.expires_at, now, grace)
    put(lock_key, encoded, px)
    put(index_prefix .. lock.id, suffix, px)
    if redis.call('ZCARD', queue_key) == 0 then
        redis.call('DEL', queue_key)
    end
    return encoded, lock
end

-- Queue an entry unless its request is already waiting; returns a reply
local function enqueue(queue_key, index_key, entry_json, score, max_size, request_id, suffix, channel, now)
    local members = redis.call('ZRANGE', queue_key, 0, -1)
    for i, member in ipairs(members) do
        local existing = cjson.decode(member)
        if existing.request.id == request_id then
            return '{"status":"queued","position":' .. i .. ',"entry":' .. member .. '}'
        end
    end
    if #members >= max_size then
        return '{"status":"queue_full","size":' .. #members .. '}'
    end
    redis.call('ZADD', queue_key, score, entry_json)
    redis.call('PEXPIRE', queue_key, 3600000)
    redis.call('SET', index_key, suffix, 'PX', 3600000)
    local position = redis.call('ZRANK', queue_key, entry_json) + 1
    local entry = cjson.decode(entry_json)
    publish(channel, 'queued', suffix, entry.request.owner, entry.lock_id, now, position)
    return '{"status":"queued","position":' .. position .. ',"entry":' .. entry_json .. '}'
end
"#;

/// KEYS: lock, queue, index(new lock id)
/// ARGV: lock_json, entry_json, now, queue_if_held, max_queue, score,
///       request_id, grace, index_prefix, channel, suffix
const ACQUIRE: &str = r#"
local lock_key, queue_key, index_key = KEYS[1], KEYS[2], KEYS[3]
local lock_json, entry_json = ARGV[1], ARGV[2]
local now = tonumber(ARGV[3])
local queue_if_held = ARGV[4] == '1'
local max_queue = tonumber(ARGV[5])
local score = ARGV[6]
local request_id = ARGV[7]
local grace = tonumber(ARGV[8])
local index_prefix, channel, suffix = ARGV[9], ARGV[10], ARGV[11]

local current = redis.call('GET', lock_key)
if current then
    local holder = cjson.decode(current)
    if is_expired(holder, now) then
        redis.call('DEL', lock_key)
        redis.call('DEL', index_prefix .. holder.id)
        publish(channel, 'expired_cleanup', suffix, holder.owner, holder.id, now)
        current = nil
    end
end

if not current then
    local promoted, lock = promote_head(queue_key, lock_key, index_prefix, suffix, now, grace)
    if promoted then
        publish(channel, 'transferred', suffix, lock.owner, lock.id, now)
        current = promoted
    end
end

if not current then
    local lock = cjson.decode(lock_json)
    local px = store_px(lock.expires_at, now, grace)
    put(lock_key, lock_json, px)
    put(index_key, suffix, px)
    publish(channel, 'acquired', suffix, lock.owner, lock.id, now)
    return '{"status":"acquired","lock":' .. lock_json .. '}'
end

local holder = cjson.decode(current)
if holder.request_id == request_id then
    return '{"status":"acquired","lock":' .. current .. '}'
end
if queue_if_held then
    return enqueue(queue_key, index_key, entry_json, score, max_queue, request_id, suffix, channel, now)
end
return '{"status":"exists","holder":' .. current .. '}'
"#;

/// KEYS: queue, index(pending lock id)
/// ARGV: entry_json, score, max_queue, request_id, suffix, channel, now
const ENQUEUE: &str = r#"
return enqueue(KEYS[1], KEYS[2], ARGV[1], ARGV[2], tonumber(ARGV[3]), ARGV[4], ARGV[5], ARGV[6], tonumber(ARGV[7]))
"#;

/// KEYS: lock, queue
/// ARGV: lock_id, now, grace, index_prefix, channel, suffix
const RELEASE: &str = r#"
local lock_key, queue_key = KEYS[1], KEYS[2]
local lock_id = ARGV[1]
local now = tonumber(ARGV[2])
local grace = tonumber(ARGV[3])
local index_prefix, channel, suffix = ARGV[4], ARGV[5], ARGV[6]

local current = redis.call('GET', lock_key)
if not current then
    return '{"status":"not_found"}'
end
local holder = cjson.decode(current)
if holder.id ~= lock_id then
    return '{"status":"not_owner"}'
end
redis.call('DEL', lock_key)
redis.call('DEL', index_prefix .. lock_id)

local promoted, next_lock = promote_head(queue_key, lock_key, index_prefix, suffix, now, grace)
if promoted then
    publish(channel, 'transferred', suffix, next_lock.owner, next_lock.id, now)
    return '{"status":"transferred","lock":' .. current .. ',"next":' .. promoted .. '}'
end
publish(channel, 'released', suffix, holder.owner, holder.id, now)
return '{"status":"released","lock":' .. current .. '}'
"#;

/// KEYS: lock, index(lock id)
/// ARGV: lock_id, extension_ms, max_ttl_ms, now, grace, channel, suffix
const REFRESH: &str = r#"
local lock_key, index_key = KEYS[1], KEYS[2]
local lock_id = ARGV[1]
local extension = tonumber(ARGV[2])
local max_ttl = tonumber(ARGV[3])
local now = tonumber(ARGV[4])
local grace = tonumber(ARGV[5])
local channel, suffix = ARGV[6], ARGV[7]

local current = redis.call('GET', lock_key)
if not current then
    return '{"status":"not_found"}'
end
local lock = cjson.decode(current)
if lock.id ~= lock_id then
    return '{"status":"not_owner"}'
end
if is_expired(lock, now) then
    return '{"status":"expired"}'
end
local remaining = 0
if lock.expires_at and lock.expires_at ~= cjson.null then
    remaining = lock.expires_at - now
end
local ttl = math.min(remaining + extension, max_ttl)
lock.expires_at = now + ttl
lock.version = (lock.version or 1) + 1
local encoded = cjson.encode(lock)
local px = store_px(lock.expires_at, now, grace)
put(lock_key, encoded, px)
put(index_key, suffix, px)
publish(channel, 'refreshed', suffix, lock.owner, lock.id, now)
return '{"status":"refreshed","lock":' .. encoded .. '}'
"#;

/// KEYS: lock
/// ARGV: lock_id, new_owner, now, channel, suffix
const TRANSFER: &str = r#"
local lock_key = KEYS[1]
local lock_id, new_owner = ARGV[1], ARGV[2]
local now = tonumber(ARGV[3])
local channel, suffix = ARGV[4], ARGV[5]

local current = redis.call('GET', lock_key)
if not current then
    return '{"status":"not_found"}'
end
local lock = cjson.decode(current)
if lock.id ~= lock_id then
    return '{"status":"not_owner"}'
end
if is_expired(lock, now) then
    return '{"status":"expired"}'
end
lock.owner = new_owner
lock.version = (lock.version or 1) + 1
local encoded = cjson.encode(lock)
redis.call('SET', lock_key, encoded, 'KEEPTTL')
publish(channel, 'owner_changed', suffix, lock.owner, lock.id, now)
return '{"status":"transferred","lock":' .. encoded .. '}'
"#;

/// Expire one resource's holder if due, then promote into a vacant slot
///
/// KEYS: lock, queue
/// ARGV: now, grace, index_prefix, channel, suffix
const SWEEP: &str = r#"
local lock_key, queue_key = KEYS[1], KEYS[2]
local now = tonumber(ARGV[1])
local grace = tonumber(ARGV[2])
local index_prefix, channel, suffix = ARGV[3], ARGV[4], ARGV[5]

local cleaned = 0
local current = redis.call('GET', lock_key)
if current then
    local holder = cjson.decode(current)
    if not is_expired(holder, now) then
        return '{"status":"held","cleaned":0,"promoted":false}'
    end
    redis.call('DEL', lock_key)
    redis.call('DEL', index_prefix .. holder.id)
    publish(channel, 'expired_cleanup', suffix, holder.owner, holder.id, now)
    cleaned = 1
end
local promoted, next_lock = promote_head(queue_key, lock_key, index_prefix, suffix, now, grace)
if promoted then
    publish(channel, 'transferred', suffix, next_lock.owner, next_lock.id, now)
    return '{"status":"swept","cleaned":' .. cleaned .. ',"promoted":true}'
end
return '{"status":"swept","cleaned":' .. cleaned .. ',"promoted":false}'
"#;

/// Rescore entries whose starvation boost changed
///
/// KEYS: queue
/// ARGV: now, threshold_ms, max_boost, band
const BOOST: &str = r#"
local queue_key = KEYS[1]
local now = tonumber(ARGV[1])
local threshold = tonumber(ARGV[2])
local max_boost = tonumber(ARGV[3])
local band = tonumber(ARGV[4])

local changed = 0
local members = redis.call('ZRANGE', queue_key, 0, -1)
for _, member in ipairs(members) do
    local entry = cjson.decode(member)
    local boost = 0
    if threshold > 0 then
        boost = math.min(math.max(math.floor((now - entry.enqueued_at) / threshold), 0), max_boost)
    end
    if boost ~= (entry.boost or 0) then
        entry.boost = boost
        local effective = math.min(entry.request.priority + boost, 3)
        local score = (4 - effective) * band + entry.enqueued_at
        redis.call('ZREM', queue_key, member)
        redis.call('ZADD', queue_key, string.format('%.0f', score), cjson.encode(entry))
        changed = changed + 1
    end
end
return changed
"#;

/// Drop entries enqueued before the cutoff
///
/// KEYS: queue
/// ARGV: cutoff_ms, index_prefix
const EXPIRE_QUEUED: &str = r#"
local queue_key = KEYS[1]
local cutoff = tonumber(ARGV[1])
local index_prefix = ARGV[2]

local removed = 0
local members = redis.call('ZRANGE', queue_key, 0, -1)
for _, member in ipairs(members) do
    local entry = cjson.decode(member)
    if entry.enqueued_at < cutoff then
        redis.call('ZREM', queue_key, member)
        redis.call('DEL', index_prefix .. entry.lock_id)
        removed = removed + 1
    end
end
if redis.call('ZCARD', queue_key) == 0 then
    redis.call('DEL', queue_key)
end
return removed
"#;

/// Remove a waiting request by id
///
/// KEYS: queue
/// ARGV: request_id, index_prefix, mode ('remove' or 'pop')
const TAKE_QUEUED: &str = r#"
local queue_key = KEYS[1]
local request_id, index_prefix, mode = ARGV[1], ARGV[2], ARGV[3]

local members = redis.call('ZRANGE', queue_key, 0, -1)
for _, member in ipairs(members) do
    local entry = cjson.decode(member)
    if mode == 'pop' or entry.request.id == request_id then
        redis.call('ZREM', queue_key, member)
        redis.call('DEL', index_prefix .. entry.lock_id)
        if redis.call('ZCARD', queue_key) == 0 then
            redis.call('DEL', queue_key)
        end
        return member
    end
end
return false
"#;

/// Leader claim renewal and release, conditional on the holder
///
/// KEYS: leader
/// ARGV: node_id, mode ('renew' or 'clear'), ttl_ms
const LEADER: &str = r#"
local current = redis.call('GET', KEYS[1])
if current ~= ARGV[1] then
    return 0
end
if ARGV[2] == 'renew' then
    redis.call('PEXPIRE', KEYS[1], tonumber(ARGV[3]))
else
    redis.call('DEL', KEYS[1])
end
return 1
"#;

/// Join the membership set unless it is full
///
/// KEYS: nodes, node
/// ARGV: node_id, node_json, ttl_ms, max_size
const JOIN: &str = r#"
local nodes_key, node_key = KEYS[1], KEYS[2]
local node_id, node_json = ARGV[1], ARGV[2]
local ttl = tonumber(ARGV[3])
local max_size = tonumber(ARGV[4])

local outcome = 'joined'
if redis.call('SISMEMBER', nodes_key, node_id) == 1 then
    outcome = 'rejoined'
elseif redis.call('SCARD', nodes_key) >= max_size then
    return 'full'
else
    redis.call('SADD', nodes_key, node_id)
end
redis.call('SET', node_key, node_json, 'PX', ttl)
return outcome
"#;

/// Loaded scripts; `redis::Script` invokes by SHA and resends on NOSCRIPT
pub struct Scripts {
    pub acquire: Script,
    pub enqueue: Script,
    pub release: Script,
    pub refresh: Script,
    pub transfer: Script,
    pub sweep: Script,
    pub boost: Script,
    pub expire_queued: Script,
    pub take_queued: Script,
    pub leader: Script,
    pub join: Script,
}

impl Scripts {
    pub fn new() -> Self {
        let with_prelude = |body: &str| Script::new(&format!("{}{}", PRELUDE, body));
        Self {
            acquire: with_prelude(ACQUIRE),
            enqueue: with_prelude(ENQUEUE),
            release: with_prelude(RELEASE),
            refresh: with_prelude(REFRESH),
            transfer: with_prelude(TRANSFER),
            sweep: with_prelude(SWEEP),
            boost: Script::new(BOOST),
            expire_queued: Script::new(EXPIRE_QUEUED),
            take_queued: Script::new(TAKE_QUEUED),
            leader: Script::new(LEADER),
            join: Script::new(JOIN),
        }
    }
}

impl Default for Scripts {
    fn default() -> Self {
        Self::new()
    }
}
