//! Tank accessories: attachments and tap requirements.
//!
//! Attachments sit on a tank and process asset in flight (metering it,
//! triggering tap openings, or granting reconnect rights). Requirements sit
//! on a tap and gate how much asset may be released through it and when.
//!
//! Each accessory kind carries a stable numeric tag used for deposit
//! overrides and wire compatibility. Attachments occupy tags 0–2 and
//! requirements tags 3–13; new kinds are always appended.

use crate::authority::{sha256, Authority, HashLock, PublicKey};
use crate::types::{
    Amount, AssetFlowLimit, AssetId, AttachmentId, AuthorizedConnections, Connection, IndexType,
    TankId, TimePointSec,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Stable identifier of an accessory kind.
pub type AccessoryTag = u16;

/// Whether an accessory is an attachment or a tap requirement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum AccessoryKind {
    Attachment,
    Requirement,
}

// =============================================================================
// TANK ATTACHMENTS
// =============================================================================

/// Receives asset and immediately releases it to a predetermined connection,
/// keeping a running tally of the total amount that has flowed through.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetFlowMeter {
    /// The type of asset that can flow through this meter.
    pub asset_type: AssetId,
    /// Where metered asset is released to.
    pub destination: Connection,
    /// Remote sources allowed to deposit to this meter.
    pub remote_sources: AuthorizedConnections,
    /// Authority that may reset the meter; if unset, only the emergency tap
    /// open authority is accepted.
    pub reset_authority: Option<Authority>,
}

/// State of an [`AssetFlowMeter`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterState {
    /// Total asset that has flowed through the meter since the last reset.
    pub metered_amount: Amount,
}

/// Receives asset, immediately releases it onward, and schedules a tap on the
/// same tank to be opened once the received asset stops moving.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapOpener {
    /// Index of the tap to open; must be on the tank carrying the opener.
    pub tap_index: IndexType,
    /// Amount to release through the opened tap.
    pub release_amount: AssetFlowLimit,
    /// Where asset is released after flowing through the opener.
    pub destination: Connection,
    /// Remote sources allowed to deposit to this opener.
    pub remote_sources: AuthorizedConnections,
    /// The type of asset that can flow through the opener.
    pub asset_type: AssetId,
}

/// Grants an authority the right to reconnect another attachment's output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentConnectAuthority {
    pub connect_authority: Authority,
    /// Index of the reconnectable attachment; must be on the current tank and
    /// must receive asset.
    pub attachment_index: IndexType,
}

/// Any attachment that can sit on a tank.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TankAttachment {
    FlowMeter(AssetFlowMeter),
    TapOpener(TapOpener),
    ConnectAuthority(AttachmentConnectAuthority),
}

impl TankAttachment {
    pub fn kind(&self) -> AccessoryKind {
        AccessoryKind::Attachment
    }

    pub fn tag(&self) -> AccessoryTag {
        match self {
            TankAttachment::FlowMeter(_) => 0,
            TankAttachment::TapOpener(_) => 1,
            TankAttachment::ConnectAuthority(_) => 2,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            TankAttachment::FlowMeter(_) => "asset flow meter",
            TankAttachment::TapOpener(_) => "tap opener",
            TankAttachment::ConnectAuthority(_) => "attachment connect authority",
        }
    }

    /// Whether at most one attachment of this kind may appear per tank.
    pub fn unique(&self) -> bool {
        false
    }

    pub fn stateful(&self) -> bool {
        matches!(self, TankAttachment::FlowMeter(_))
    }

    /// The asset this attachment accepts, if it can receive asset at all.
    pub fn receives_asset(&self) -> Option<AssetId> {
        match self {
            TankAttachment::FlowMeter(meter) => Some(meter.asset_type),
            TankAttachment::TapOpener(opener) => Some(opener.asset_type),
            TankAttachment::ConnectAuthority(_) => None,
        }
    }

    /// Where this attachment releases received asset, if it receives any.
    pub fn output_connection(&self) -> Option<&Connection> {
        match self {
            TankAttachment::FlowMeter(meter) => Some(&meter.destination),
            TankAttachment::TapOpener(opener) => Some(&opener.destination),
            TankAttachment::ConnectAuthority(_) => None,
        }
    }

    pub fn authorized_sources(&self) -> Option<&AuthorizedConnections> {
        match self {
            TankAttachment::FlowMeter(meter) => Some(&meter.remote_sources),
            TankAttachment::TapOpener(opener) => Some(&opener.remote_sources),
            TankAttachment::ConnectAuthority(_) => None,
        }
    }
}

// =============================================================================
// TAP REQUIREMENTS
// =============================================================================

/// Flat limit on the amount released in any single opening.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImmediateFlowLimit {
    pub limit: Amount,
}

/// Limit on the cumulative total released through the tap over its lifetime.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CumulativeFlowLimit {
    pub limit: Amount,
}

/// State of a [`CumulativeFlowLimit`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CumulativeFlowState {
    pub amount_released: Amount,
}

/// Limit on the total released within recurring periods. The first period
/// begins at the tank's creation date.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodicFlowLimit {
    pub period_duration_sec: u32,
    pub limit: Amount,
}

impl PeriodicFlowLimit {
    /// Sequence number of the period containing `time`.
    pub fn period_num_at(&self, creation_date: TimePointSec, time: TimePointSec) -> u32 {
        time.secs_since(creation_date) / self.period_duration_sec
    }
}

/// State of a [`PeriodicFlowLimit`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodicFlowState {
    /// Period during which the last release took place.
    pub period_num: u32,
    /// Amount released during that period.
    pub amount_released: Amount,
}

/// Locks and unlocks the tap at predetermined times.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeLock {
    /// Whether the tap is locked before the first switch time.
    pub start_locked: bool,
    /// The lock state flips at each of these times; strictly increasing.
    pub lock_unlock_times: Vec<TimePointSec>,
}

impl TimeLock {
    pub fn unlocked_at(&self, time: TimePointSec) -> bool {
        let switches = self
            .lock_unlock_times
            .iter()
            .take_while(|switch_time| **switch_time < time)
            .count();
        let locked_now = self.start_locked ^ (switches % 2 == 1);
        !locked_now
    }
}

/// Prevents the tap from draining the tank below a floor balance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinimumTankLevel {
    pub minimum_level: Amount,
}

/// A pending request to open a tap guarded by a [`ReviewRequirement`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub request_amount: AssetFlowLimit,
    pub request_comment: Option<String>,
    pub approved: bool,
}

/// State of a [`ReviewRequirement`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewState {
    /// Requests made so far; assigns request ids.
    pub request_counter: IndexType,
    pub pending_requests: BTreeMap<IndexType, ReviewRequest>,
}

/// Requires a release request to be reviewed and approved before the tap can
/// open.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRequirement {
    /// Authority that approves or denies requests.
    pub reviewer: Authority,
    /// Maximum number of pending requests.
    pub request_limit: IndexType,
}

/// Requires a non-empty documentation string to be provided when opening.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentationRequirement;

/// A pending request to open a tap guarded by a [`DelayRequirement`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRequest {
    /// When the request matures and can be consumed.
    pub delay_period_end: TimePointSec,
    pub request_amount: AssetFlowLimit,
    pub request_comment: Option<String>,
}

/// State of a [`DelayRequirement`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayState {
    pub request_counter: IndexType,
    pub pending_requests: BTreeMap<IndexType, DelayRequest>,
}

/// Requires a release request to mature for a delay period before the tap can
/// open; a veto authority may cancel requests before they mature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRequirement {
    pub veto_authority: Option<Authority>,
    pub delay_period_sec: u32,
    /// Maximum number of outstanding requests.
    pub request_limit: IndexType,
}

/// Requires the preimage of a hash to be revealed to open the tap.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashPreimageRequirement {
    pub hash: HashLock,
    /// Required preimage size in bytes; any size accepted if unset.
    pub preimage_size: Option<u16>,
}

/// A signed authorization to release asset through a ticketed tap.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Tank containing the ticketed tap.
    pub tank_id: TankId,
    /// The ticketed tap.
    pub tap_index: IndexType,
    /// Index of the ticket requirement in the tap's requirement list.
    pub requirement_index: IndexType,
    /// Maximum release this ticket authorizes.
    pub max_withdrawal: AssetFlowLimit,
    /// Must equal the count of tickets consumed so far.
    pub ticket_number: IndexType,
}

impl Ticket {
    /// Canonical digest signed by the ticket signer. Little-endian fixed-width
    /// fields; the withdrawal limit is tagged with one byte.
    pub fn digest(&self) -> [u8; 32] {
        let mut bytes = Vec::with_capacity(23);
        bytes.extend_from_slice(&self.tank_id.0.to_le_bytes());
        bytes.extend_from_slice(&self.tap_index.to_le_bytes());
        bytes.extend_from_slice(&self.requirement_index.to_le_bytes());
        match self.max_withdrawal {
            AssetFlowLimit::Unlimited => bytes.push(0),
            AssetFlowLimit::Amount(amount) => {
                bytes.push(1);
                bytes.extend_from_slice(&amount.to_le_bytes());
            }
        }
        bytes.extend_from_slice(&self.ticket_number.to_le_bytes());
        sha256(&bytes)
    }
}

/// State of a [`TicketRequirement`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketState {
    pub tickets_consumed: IndexType,
}

/// Requires a ticket signed by a designated key to open the tap.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRequirement {
    pub ticket_signer: PublicKey,
}

/// State of an [`ExchangeRequirement`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeState {
    pub amount_released: Amount,
}

/// Limits the release based on the reading of a flow meter and an exchange
/// rate: once the meter has received a full `tick_amount`, the tap may
/// release `release_per_tick`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRequirement {
    /// The meter to read; may live on another tank.
    pub meter_id: AttachmentId,
    pub release_per_tick: Amount,
    pub tick_amount: Amount,
    /// Authority that may reset the amount released; if unset, only the
    /// emergency tap open authority is accepted.
    pub reset_authority: Option<Authority>,
}

impl ExchangeRequirement {
    pub fn max_release_amount(&self, amount_released: Amount, meter: &MeterState) -> Amount {
        meter.metered_amount / self.tick_amount * self.release_per_tick - amount_released
    }
}

/// Any requirement that can guard a tap.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TapRequirement {
    ImmediateFlowLimit(ImmediateFlowLimit),
    CumulativeFlowLimit(CumulativeFlowLimit),
    PeriodicFlowLimit(PeriodicFlowLimit),
    TimeLock(TimeLock),
    MinimumTankLevel(MinimumTankLevel),
    Review(ReviewRequirement),
    Documentation(DocumentationRequirement),
    Delay(DelayRequirement),
    HashPreimage(HashPreimageRequirement),
    Ticket(TicketRequirement),
    Exchange(ExchangeRequirement),
}

impl TapRequirement {
    pub fn kind(&self) -> AccessoryKind {
        AccessoryKind::Requirement
    }

    pub fn tag(&self) -> AccessoryTag {
        match self {
            TapRequirement::ImmediateFlowLimit(_) => 3,
            TapRequirement::CumulativeFlowLimit(_) => 4,
            TapRequirement::PeriodicFlowLimit(_) => 5,
            TapRequirement::TimeLock(_) => 6,
            TapRequirement::MinimumTankLevel(_) => 7,
            TapRequirement::Review(_) => 8,
            TapRequirement::Documentation(_) => 9,
            TapRequirement::Delay(_) => 10,
            TapRequirement::HashPreimage(_) => 11,
            TapRequirement::Ticket(_) => 12,
            TapRequirement::Exchange(_) => 13,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            TapRequirement::ImmediateFlowLimit(_) => "immediate flow limit",
            TapRequirement::CumulativeFlowLimit(_) => "cumulative flow limit",
            TapRequirement::PeriodicFlowLimit(_) => "periodic flow limit",
            TapRequirement::TimeLock(_) => "time lock",
            TapRequirement::MinimumTankLevel(_) => "minimum tank level",
            TapRequirement::Review(_) => "review requirement",
            TapRequirement::Documentation(_) => "documentation requirement",
            TapRequirement::Delay(_) => "delay requirement",
            TapRequirement::HashPreimage(_) => "hash preimage requirement",
            TapRequirement::Ticket(_) => "ticket requirement",
            TapRequirement::Exchange(_) => "exchange requirement",
        }
    }

    /// Whether at most one requirement of this kind may appear per tap.
    pub fn unique(&self) -> bool {
        !matches!(
            self,
            TapRequirement::PeriodicFlowLimit(_)
                | TapRequirement::HashPreimage(_)
                | TapRequirement::Ticket(_)
                | TapRequirement::Exchange(_)
        )
    }

    pub fn stateful(&self) -> bool {
        matches!(
            self,
            TapRequirement::CumulativeFlowLimit(_)
                | TapRequirement::PeriodicFlowLimit(_)
                | TapRequirement::Review(_)
                | TapRequirement::Delay(_)
                | TapRequirement::Ticket(_)
                | TapRequirement::Exchange(_)
        )
    }
}

/// Whether an accessory tag names a stateful accessory.
pub fn tag_is_stateful(tag: AccessoryTag) -> bool {
    matches!(tag, 0 | 4 | 5 | 8 | 10 | 12 | 13)
}

// =============================================================================
// ACCESSORY STATE
// =============================================================================

/// Runtime state of any stateful accessory, stored per accessory address on
/// the tank object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessoryState {
    Meter(MeterState),
    CumulativeFlow(CumulativeFlowState),
    PeriodicFlow(PeriodicFlowState),
    Review(ReviewState),
    Delay(DelayState),
    Ticket(TicketState),
    Exchange(ExchangeState),
}

/// Typed access into [`AccessoryState`] for a specific state kind.
pub trait AccessoryStateKind: Default + Sized {
    fn peek(state: &AccessoryState) -> Option<&Self>;
    fn peek_mut(state: &mut AccessoryState) -> Option<&mut Self>;
    fn wrap(self) -> AccessoryState;
}

macro_rules! impl_state_kind {
    ($state:ty, $variant:ident) => {
        impl AccessoryStateKind for $state {
            fn peek(state: &AccessoryState) -> Option<&Self> {
                match state {
                    AccessoryState::$variant(inner) => Some(inner),
                    _ => None,
                }
            }

            fn peek_mut(state: &mut AccessoryState) -> Option<&mut Self> {
                match state {
                    AccessoryState::$variant(inner) => Some(inner),
                    _ => None,
                }
            }

            fn wrap(self) -> AccessoryState {
                AccessoryState::$variant(self)
            }
        }
    };
}

impl_state_kind!(MeterState, Meter);
impl_state_kind!(CumulativeFlowState, CumulativeFlow);
impl_state_kind!(PeriodicFlowState, PeriodicFlow);
impl_state_kind!(ReviewState, Review);
impl_state_kind!(DelayState, Delay);
impl_state_kind!(TicketState, Ticket);
impl_state_kind!(ExchangeState, Exchange);

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_lock_parity() {
        let lock = TimeLock {
            start_locked: true,
            lock_unlock_times: vec![TimePointSec(100), TimePointSec(200)],
        };
        assert!(!lock.unlocked_at(TimePointSec(50)));
        assert!(lock.unlocked_at(TimePointSec(150)));
        assert!(!lock.unlocked_at(TimePointSec(250)));

        let lock = TimeLock {
            start_locked: false,
            lock_unlock_times: vec![TimePointSec(100)],
        };
        assert!(lock.unlocked_at(TimePointSec(50)));
        assert!(!lock.unlocked_at(TimePointSec(150)));
    }

    #[test]
    fn test_time_lock_switch_takes_effect_after_the_instant() {
        let lock = TimeLock {
            start_locked: true,
            lock_unlock_times: vec![TimePointSec(100)],
        };
        assert!(!lock.unlocked_at(TimePointSec(100)));
        assert!(lock.unlocked_at(TimePointSec(101)));
    }

    #[test]
    fn test_period_numbering() {
        let limit = PeriodicFlowLimit { period_duration_sec: 86_400, limit: 1000 };
        let creation = TimePointSec(1_000);
        assert_eq!(limit.period_num_at(creation, TimePointSec(1_000)), 0);
        assert_eq!(limit.period_num_at(creation, TimePointSec(1_000 + 86_399)), 0);
        assert_eq!(limit.period_num_at(creation, TimePointSec(1_000 + 86_400)), 1);
        assert_eq!(limit.period_num_at(creation, TimePointSec(1_000 + 3 * 86_400)), 3);
    }

    #[test]
    fn test_exchange_release_comes_in_ticks() {
        let exchange = ExchangeRequirement {
            meter_id: AttachmentId::new(None, 0),
            release_per_tick: 100,
            tick_amount: 10,
            reset_authority: None,
        };
        let meter = MeterState { metered_amount: 25 };
        assert_eq!(exchange.max_release_amount(0, &meter), 200);
        assert_eq!(exchange.max_release_amount(150, &meter), 50);
    }

    #[test]
    fn test_ticket_digest_is_field_sensitive() {
        let ticket = Ticket {
            tank_id: TankId(1),
            tap_index: 2,
            requirement_index: 0,
            max_withdrawal: AssetFlowLimit::Amount(500),
            ticket_number: 0,
        };
        let mut replay = ticket.clone();
        replay.ticket_number = 1;
        assert_ne!(ticket.digest(), replay.digest());

        let mut unlimited = ticket.clone();
        unlimited.max_withdrawal = AssetFlowLimit::Unlimited;
        assert_ne!(ticket.digest(), unlimited.digest());
    }

    #[test]
    fn test_accessory_tags_are_stable() {
        let meter = TankAttachment::FlowMeter(AssetFlowMeter {
            asset_type: AssetId(0),
            destination: Connection::SameTank,
            remote_sources: AuthorizedConnections::All,
            reset_authority: None,
        });
        assert_eq!(meter.tag(), 0);

        let exchange = TapRequirement::Exchange(ExchangeRequirement {
            meter_id: AttachmentId::new(None, 0),
            release_per_tick: 1,
            tick_amount: 1,
            reset_authority: None,
        });
        assert_eq!(exchange.tag(), 13);
        assert!(tag_is_stateful(exchange.tag()));
        assert!(!tag_is_stateful(3));
    }

    #[test]
    fn test_stateful_flags_match_tags() {
        let requirements = [
            (TapRequirement::ImmediateFlowLimit(ImmediateFlowLimit { limit: 1 }), false),
            (TapRequirement::CumulativeFlowLimit(CumulativeFlowLimit { limit: 1 }), true),
            (TapRequirement::Documentation(DocumentationRequirement), false),
            (TapRequirement::Ticket(TicketRequirement { ticket_signer: PublicKey::default() }), true),
        ];
        for (requirement, stateful) in requirements {
            assert_eq!(requirement.stateful(), stateful, "{}", requirement.kind_name());
            assert_eq!(tag_is_stateful(requirement.tag()), stateful);
        }
    }

    #[test]
    fn test_typed_state_extraction() {
        let mut state = MeterState { metered_amount: 10 }.wrap();
        assert_eq!(MeterState::peek(&state).unwrap().metered_amount, 10);
        assert!(ReviewState::peek(&state).is_none());
        MeterState::peek_mut(&mut state).unwrap().metered_amount = 20;
        assert_eq!(MeterState::peek(&state).unwrap().metered_amount, 20);
    }
}
