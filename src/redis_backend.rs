//! # Redis Grid Backend
//!
//! A [`crate::grid::GridBackend`] over Redis. One Lua script dispatches on
//! an opcode and mirrors `algorithm`'s refill/consumption formulas
//! server-side, so the whole read-modify-write cycle is one round trip and
//! one atomic `EVAL`, covering every [`crate::grid::EntryProcessor`] variant
//! from a single script instead of one script per operation.
//!
//! Lua numbers are IEEE-754 doubles, exact only up to 2^53. `now_nanos` here
//! is wall-clock nanoseconds since the Unix epoch (see
//! [`crate::time::WallClock`]), which is already well past that bound, so the
//! script's view of `now` carries a representation error on the order of a
//! few hundred nanoseconds. That's negligible against the second-or-longer
//! refill periods this crate is built for, but it does mean the Lua side is
//! not the place to add sub-microsecond bandwidth rules.

use crate::bandwidth::RefillStrategy;
use crate::error::{Result, ThrottlerError};
use crate::grid::{EntryProcessor, EntryResult, GridBackend};
use crate::state::Configuration;
use redis::{Client, Script};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DISPATCH_SCRIPT: &str = r#"
local key = KEYS[1]
local op = ARGV[1]
local n = tonumber(ARGV[2])
local param2 = ARGV[3]
local now = tonumber(ARGV[4])
local ttl = tonumber(ARGV[5])
local config = cjson.decode(ARGV[6])
local fresh_state_json = ARGV[7]

local existing = redis.call('GET', key)
local state
if existing then
    state = cjson.decode(existing)
else
    if fresh_state_json == 'null' then
        return cjson.encode({error = 'not_found'})
    end
    state = cjson.decode(fresh_state_json)
end

for i, bw in ipairs(config) do
    local s = state.bandwidths[i]
    local elapsed = now - s.last_refill_nanos
    if elapsed > 0 then
        local added = 0
        if bw.strategy == 'smooth' then
            local budget = elapsed * bw.refill_tokens + s.rounding_error_nanos
            added = math.floor(budget / bw.refill_period_nanos)
            local consumed_nanos = math.floor(added * bw.refill_period_nanos / bw.refill_tokens)
            s.rounding_error_nanos = budget - consumed_nanos * bw.refill_tokens
            s.last_refill_nanos = s.last_refill_nanos + consumed_nanos
        else
            local periods = math.floor(elapsed / bw.refill_period_nanos)
            added = periods * bw.refill_tokens
            s.last_refill_nanos = s.last_refill_nanos + periods * bw.refill_period_nanos
        end
        s.current_tokens = math.min(s.current_tokens + added, bw.capacity)
    end
end

local function min_available()
    local m = nil
    for _, s in ipairs(state.bandwidths) do
        local avail = math.max(s.current_tokens, 0)
        if m == nil or avail < m then m = avail end
    end
    return m or 0
end

local result
if op == 'try_consume' then
    if min_available() >= n then
        for _, s in ipairs(state.bandwidths) do s.current_tokens = s.current_tokens - n end
        result = {consumed = true}
    else
        result = {consumed = false}
    end
elseif op == 'consume_as_much' then
    local available = min_available()
    local consumed = available
    if param2 ~= 'null' then
        local limit = tonumber(param2)
        if limit < consumed then consumed = limit end
    end
    for _, s in ipairs(state.bandwidths) do s.current_tokens = s.current_tokens - consumed end
    result = {consumed_amount = consumed}
elseif op == 'add_tokens' then
    for i, bw in ipairs(config) do
        local s = state.bandwidths[i]
        s.current_tokens = math.min(s.current_tokens + n, bw.capacity)
    end
    result = {added = true}
elseif op == 'get_state' then
    result = {available_tokens = min_available()}
elseif op == 'reserve' then
    local min_capacity = nil
    for _, bw in ipairs(config) do
        if min_capacity == nil or bw.capacity < min_capacity then min_capacity = bw.capacity end
    end
    if n > min_capacity then
        result = {rejected = true}
    else
        local max_wait = tonumber(param2)
        local wait_nanos = 0
        for i, bw in ipairs(config) do
            local s = state.bandwidths[i]
            local deficit = n - s.current_tokens
            if deficit > 0 then
                local w = math.ceil(deficit * bw.refill_period_nanos / bw.refill_tokens)
                if w > wait_nanos then wait_nanos = w end
            end
        end
        if wait_nanos > max_wait then
            result = {rejected = true}
        else
            for _, s in ipairs(state.bandwidths) do s.current_tokens = s.current_tokens - n end
            result = {reserved = true, wait_nanos = wait_nanos}
        end
    end
end

redis.call('SET', key, cjson.encode(state))
if ttl > 0 then
    redis.call('EXPIRE', key, ttl)
end
return cjson.encode(result)
"#;

#[derive(Serialize)]
struct LuaBandwidth {
    capacity: u64,
    refill_tokens: u64,
    refill_period_nanos: u64,
    strategy: &'static str,
}

#[derive(Deserialize)]
struct LuaResult {
    error: Option<String>,
    consumed: Option<bool>,
    consumed_amount: Option<u64>,
    added: Option<bool>,
    available_tokens: Option<u64>,
    rejected: Option<bool>,
    reserved: Option<bool>,
    wait_nanos: Option<u64>,
}

/// A [`GridBackend`] storing bucket state as one Redis string key per
/// bucket, mutated atomically via [`DISPATCH_SCRIPT`].
#[derive(Clone)]
pub struct RedisGridBackend {
    client: Client,
    entry_ttl: Duration,
}

impl RedisGridBackend {
    pub fn new(redis_url: &str, entry_ttl: Duration) -> Result<Self> {
        let client = Client::open(redis_url)?;
        Ok(Self { client, entry_ttl })
    }

    fn configuration_payload(configuration: &Configuration) -> String {
        let bandwidths: Vec<LuaBandwidth> = configuration
            .bandwidths()
            .iter()
            .map(|b| LuaBandwidth {
                capacity: b.capacity(),
                refill_tokens: b.refill_tokens(),
                refill_period_nanos: b.refill_period_nanos(),
                strategy: match b.strategy() {
                    RefillStrategy::Smooth => "smooth",
                    RefillStrategy::Intervally => "intervally",
                },
            })
            .collect();
        serde_json::to_string(&bandwidths).expect("bandwidth payload is always serializable")
    }

    fn fresh_state_payload(configuration: &Configuration, now_nanos: u64) -> String {
        use crate::state::BucketState;
        let state = BucketState::new(configuration, now_nanos);
        serde_json::to_string(&state).expect("bucket state is always serializable")
    }
}

impl GridBackend for RedisGridBackend {
    fn invoke(
        &self,
        key: &str,
        processor: EntryProcessor,
        now_nanos: u64,
        on_missing: Option<&Configuration>,
    ) -> Result<EntryResult> {
        let (op, n, param2) = match processor {
            EntryProcessor::TryConsume { n } => ("try_consume", n, "null".to_string()),
            EntryProcessor::Reserve { n, max_wait_nanos } => {
                ("reserve", n, max_wait_nanos.to_string())
            }
            EntryProcessor::ConsumeAsMuchAsPossible { limit } => (
                "consume_as_much",
                0,
                limit.map(|l| l.to_string()).unwrap_or_else(|| "null".to_string()),
            ),
            EntryProcessor::AddTokens { n } => ("add_tokens", n, "null".to_string()),
            EntryProcessor::GetState => ("get_state", 0, "null".to_string()),
        };

        let configuration = on_missing.ok_or(ThrottlerError::BucketNotFound(key.to_string()));
        let (config_json, fresh_state_json) = match configuration {
            Ok(configuration) => (
                Self::configuration_payload(configuration),
                Self::fresh_state_payload(configuration, now_nanos),
            ),
            Err(_) => (String::new(), "null".to_string()),
        };
        // A THROW recovery strategy never reaches this branch with
        // `on_missing == None` unless the key really is absent server-side;
        // the script itself decides that, so an empty config payload here is
        // only ever sent together with `fresh_state_json == "null"`, which
        // the script never reads unless the key is missing.
        let config_json = if config_json.is_empty() {
            "[]".to_string()
        } else {
            config_json
        };

        let mut conn = self.client.get_connection()?;
        let raw: String = Script::new(DISPATCH_SCRIPT)
            .key(key)
            .arg(op)
            .arg(n)
            .arg(param2)
            .arg(now_nanos)
            .arg(self.entry_ttl.as_secs())
            .arg(config_json)
            .arg(fresh_state_json)
            .invoke(&mut conn)?;

        let parsed: LuaResult = serde_json::from_str(&raw)?;
        if parsed.error.is_some() {
            return Err(ThrottlerError::BucketNotFound(key.to_string()));
        }
        if let Some(consumed) = parsed.consumed {
            return Ok(EntryResult::Consumed(consumed));
        }
        if let Some(amount) = parsed.consumed_amount {
            return Ok(EntryResult::ConsumedAmount(amount));
        }
        if parsed.added.unwrap_or(false) {
            return Ok(EntryResult::Added);
        }
        if let Some(available) = parsed.available_tokens {
            return Ok(EntryResult::AvailableTokens(available));
        }
        if parsed.rejected.unwrap_or(false) {
            return Ok(EntryResult::Reserved(crate::algorithm::ReservationOutcome::Rejected));
        }
        if parsed.reserved.unwrap_or(false) {
            let wait_nanos = parsed.wait_nanos.unwrap_or(0);
            return Ok(EntryResult::Reserved(
                crate::algorithm::ReservationOutcome::Reserved { wait_nanos },
            ));
        }
        Err(ThrottlerError::GridFailure(format!(
            "unrecognized dispatch script response: {raw}"
        )))
    }
}
