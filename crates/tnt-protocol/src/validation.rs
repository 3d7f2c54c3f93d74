//! Static validation of tank schematics and deposit accounting.
//!
//! The validator runs the full battery of checks over a schematic: internal
//! consistency of every attachment, the emergency-tap rules, every tap and
//! its requirements, and the connection chain of every connected tap. With a
//! [`TankLookup`] it also verifies cross-tank references; without one, those
//! checks are skipped rather than failed.
//!
//! Validation tallies the distinct accessory kinds present, and the deposit
//! calculation charges the tank base plus one accessory deposit per distinct
//! kind, honoring per-kind overrides and the stateful premium.

use crate::accessories::{AccessoryTag, TankAttachment, TapRequirement};
use crate::errors::{
    AccessoryPath, LookupError, ProtocolError, ValidationError, ValidationErrorKind,
};
use crate::lookups::{ConnectionAsset, ConnectionChain, Lookups, TankLookup};
use crate::parameters::TntParameters;
use crate::schematic::{Tap, TankSchematic, EMERGENCY_TAP};
use crate::types::{
    AccountId, Amount, AssetId, AuthorizedConnections, Connection, IndexType, RemoteConnection,
    TankId,
};
use std::collections::BTreeSet;

/// Tracks accessory tags to enforce per-container uniqueness.
#[derive(Debug, Default)]
pub struct UniquenessChecker {
    tags_seen: BTreeSet<AccessoryTag>,
}

impl UniquenessChecker {
    /// Record a tag. Returns false if the tag is marked unique and has been
    /// seen before.
    pub fn check(&mut self, tag: AccessoryTag, unique: bool) -> bool {
        if unique && self.tags_seen.contains(&tag) {
            return false;
        }
        self.tags_seen.insert(tag);
        true
    }
}

/// Validates a tank schematic and computes summary information over it.
pub struct TankValidator<'a> {
    lookups: Lookups<'a>,
    max_connection_chain_length: usize,
    /// Id of the tank being validated, when it already exists. Enables exact
    /// source-restriction checks on taps connected to restricted tanks.
    tank_id: Option<TankId>,
    has_validated: bool,
    attachment_tags: BTreeSet<AccessoryTag>,
    requirement_tags: BTreeSet<AccessoryTag>,
}

impl<'a> TankValidator<'a> {
    pub fn new(schematic: &'a TankSchematic, max_connection_chain_length: usize) -> Self {
        Self {
            lookups: Lookups::new(schematic),
            max_connection_chain_length,
            tank_id: None,
            has_validated: false,
            attachment_tags: BTreeSet::new(),
            requirement_tags: BTreeSet::new(),
        }
    }

    pub fn with_lookup(
        schematic: &'a TankSchematic,
        max_connection_chain_length: usize,
        lookup: &'a dyn TankLookup,
    ) -> Self {
        Self {
            lookups: Lookups::with_lookup(schematic, lookup),
            max_connection_chain_length,
            tank_id: None,
            has_validated: false,
            attachment_tags: BTreeSet::new(),
            requirement_tags: BTreeSet::new(),
        }
    }

    pub fn for_tank(mut self, tank_id: TankId) -> Self {
        self.tank_id = Some(tank_id);
        self
    }

    fn schematic(&self) -> &'a TankSchematic {
        self.lookups.current_tank()
    }

    // =========================================================================
    // FULL VALIDATION
    // =========================================================================

    /// Validate the entire schematic. Attachments are checked first because
    /// taps may connect to them.
    pub fn validate_tank(&mut self) -> Result<(), ProtocolError> {
        let schematic = self.schematic();

        let mut unique = UniquenessChecker::default();
        for (index, attachment) in &schematic.attachments {
            if !unique.check(attachment.tag(), attachment.unique()) {
                return Err(ValidationError::new(
                    AccessoryPath::attachment(*index),
                    ValidationErrorKind::DuplicateAttachmentType { kind: attachment.kind_name() },
                )
                .into());
            }
            self.validate_attachment(*index)?;
        }

        self.validate_emergency_tap()?;
        for index in schematic.taps.keys() {
            self.validate_tap(*index)?;
        }

        self.has_validated = true;
        Ok(())
    }

    /// Validate one attachment in the context of the schematic.
    pub fn validate_attachment(&mut self, index: IndexType) -> Result<(), ProtocolError> {
        let schematic = self.schematic();
        let path = AccessoryPath::attachment(index);
        let attachment = schematic.attachment(index).ok_or_else(|| {
            ValidationError::new(path, ValidationErrorKind::AttachmentNotFound { attachment: index })
        })?;

        Self::validate_attachment_structure(attachment)
            .map_err(|err| err.at(path))?;

        match attachment {
            TankAttachment::FlowMeter(meter) => {
                self.check_own_tank_not_authorized(&meter.remote_sources, path)?;
                self.check_destination_asset(&meter.destination, meter.asset_type, path)?;
            }
            TankAttachment::TapOpener(opener) => {
                self.check_own_tank_not_authorized(&opener.remote_sources, path)?;
                if !schematic.taps.contains_key(&opener.tap_index) {
                    return Err(ValidationError::new(
                        path,
                        ValidationErrorKind::OpenerTapNotFound { tap: opener.tap_index },
                    )
                    .into());
                }
                self.check_destination_asset(&opener.destination, opener.asset_type, path)?;
            }
            TankAttachment::ConnectAuthority(aca) => {
                let target = schematic.attachment(aca.attachment_index).ok_or_else(|| {
                    ValidationError::new(
                        path,
                        ValidationErrorKind::ReconnectTargetNotFound {
                            attachment: aca.attachment_index,
                        },
                    )
                })?;
                if target.receives_asset().is_none() {
                    return Err(ValidationError::new(
                        path,
                        ValidationErrorKind::ReconnectTargetReceivesNoAsset {
                            attachment: aca.attachment_index,
                        },
                    )
                    .into());
                }
            }
        }

        self.attachment_tags.insert(attachment.tag());
        Ok(())
    }

    /// Validate one tap, including its connection chain if connected.
    pub fn validate_tap(&mut self, index: IndexType) -> Result<(), ProtocolError> {
        let schematic = self.schematic();
        let path = AccessoryPath::tap(index);
        let tap = schematic.tap(index).ok_or_else(|| {
            ValidationError::new(path, ValidationErrorKind::TapNotFound { tap: index })
        })?;

        if tap.connected_connection.is_none() && tap.connect_authority.is_none() {
            return Err(ValidationError::new(
                path,
                ValidationErrorKind::TapUnconnectedWithoutConnectAuthority,
            )
            .into());
        }

        let mut unique = UniquenessChecker::default();
        for (req_index, requirement) in tap.requirements.iter().enumerate() {
            let req_index = req_index as IndexType;
            if !unique.check(requirement.tag(), requirement.unique()) {
                return Err(ValidationError::new(
                    AccessoryPath::requirement(index, req_index),
                    ValidationErrorKind::DuplicateRequirementType {
                        kind: requirement.kind_name(),
                    },
                )
                .into());
            }
            self.validate_tap_requirement(index, req_index)?;
        }

        self.check_tap_connection(index)?;
        Ok(())
    }

    /// Validate one requirement in the context of the schematic.
    pub fn validate_tap_requirement(
        &mut self,
        tap_index: IndexType,
        requirement_index: IndexType,
    ) -> Result<(), ProtocolError> {
        let schematic = self.schematic();
        let path = AccessoryPath::requirement(tap_index, requirement_index);
        let requirement = schematic
            .tap(tap_index)
            .and_then(|tap| tap.requirements.get(usize::from(requirement_index)))
            .ok_or_else(|| {
                ValidationError::new(path, ValidationErrorKind::TapNotFound { tap: tap_index })
            })?;

        Self::validate_requirement_structure(requirement).map_err(|err| err.at(path))?;

        if let TapRequirement::Exchange(exchange) = requirement {
            match self.lookups.lookup_attachment(exchange.meter_id) {
                Ok(attachment) => {
                    if !matches!(attachment, TankAttachment::FlowMeter(_)) {
                        return Err(ValidationError::new(
                            path,
                            ValidationErrorKind::ExchangeMeterNotAMeter {
                                attachment: exchange.meter_id,
                            },
                        )
                        .into());
                    }
                }
                Err(LookupError::NeedLookupFunction) => {}
                Err(LookupError::NonexistentObject(object)) => {
                    return Err(ValidationError::new(
                        path,
                        ValidationErrorKind::Nonexistent(object),
                    )
                    .into());
                }
            }
        }

        self.requirement_tags.insert(requirement.tag());
        Ok(())
    }

    /// The emergency tap must exist with its fixed shape.
    pub fn validate_emergency_tap(&self) -> Result<(), ProtocolError> {
        let schematic = self.schematic();
        let tap = schematic.emergency_tap().ok_or_else(|| {
            ValidationError::new(
                AccessoryPath::tap(EMERGENCY_TAP),
                ValidationErrorKind::EmergencyTapMissing,
            )
        })?;
        Self::validate_emergency_tap_structure(tap)
            .map_err(|err| err.at(AccessoryPath::tap(EMERGENCY_TAP)))?;
        Ok(())
    }

    // =========================================================================
    // CONNECTION CHAIN CHECK
    // =========================================================================

    /// If the tap is connected, walk its connection chain and verify asset
    /// compatibility, length, and the destination's source restrictions.
    pub fn check_tap_connection(&self, tap_index: IndexType) -> Result<(), ProtocolError> {
        let schematic = self.schematic();
        let path = AccessoryPath::tap(tap_index);
        let tap = schematic.tap(tap_index).ok_or_else(|| {
            ValidationError::new(path, ValidationErrorKind::TapNotFound { tap: tap_index })
        })?;
        let Some(connection) = &tap.connected_connection else {
            return Ok(());
        };

        let chain = match self.lookups.connection_chain(
            connection,
            self.max_connection_chain_length,
            Some(schematic.asset_type),
        ) {
            Ok(chain) => chain,
            Err(ProtocolError::Lookup(LookupError::NeedLookupFunction)) => return Ok(()),
            Err(ProtocolError::Lookup(LookupError::NonexistentObject(object))) => {
                return Err(
                    ValidationError::new(path, ValidationErrorKind::Nonexistent(object)).into()
                );
            }
            Err(ProtocolError::Connection(err)) => {
                return Err(ValidationError::new(path, err).into());
            }
            Err(other) => return Err(other),
        };

        self.check_destination_source_restriction(&chain, path)
    }

    /// Enforce the destination tank's deposit-source policy: when the chain
    /// terminates on a tank with an explicit source set, the penultimate
    /// connection must be in the set, unless it sits on the destination tank
    /// itself.
    fn check_destination_source_restriction(
        &self,
        chain: &ConnectionChain,
        path: AccessoryPath,
    ) -> Result<(), ProtocolError> {
        let terminal = chain.connections.last().expect("chains are never empty");
        let destination_tank = match terminal {
            Connection::Tank(id) => Some(*id),
            Connection::SameTank => chain.final_connection_tank,
            _ => return Ok(()),
        };

        let destination_schematic = match self.lookups.lookup_tank(destination_tank) {
            Ok(schematic) => schematic,
            Err(LookupError::NeedLookupFunction) => return Ok(()),
            Err(LookupError::NonexistentObject(object)) => {
                return Err(
                    ValidationError::new(path, ValidationErrorKind::Nonexistent(object)).into()
                );
            }
        };
        let AuthorizedConnections::Sources(authorized) = &destination_schematic.remote_sources
        else {
            return Ok(());
        };

        // The source of the deposit is the hop before the terminal, or the
        // tank being validated when the tap connects to the destination
        // directly. `None` tank context means "the tank being validated".
        let penultimate = (chain.connections.len() >= 2)
            .then(|| chain.connections[chain.connections.len() - 2]);
        let source_tank: Option<Option<TankId>> = match penultimate {
            None | Some(Connection::SameTank) => Some(None),
            Some(Connection::Attachment(id)) => Some(id.tank_id),
            Some(Connection::Tank(id)) => Some(Some(id)),
            Some(Connection::Account(_)) => None,
        };

        // Deposits from the destination tank itself are implicitly allowed.
        if let Some(source_tank) = source_tank {
            let same_tank = match (source_tank.or(self.tank_id), destination_tank) {
                (Some(source), Some(destination)) => source == destination,
                (None, None) => true,
                (Some(source), None) => self.tank_id == Some(source),
                (None, Some(destination)) => self.tank_id == Some(destination),
            };
            if same_tank {
                return Ok(());
            }
        }

        let source = match penultimate {
            Some(Connection::Attachment(mut id)) => {
                if id.tank_id.is_none() {
                    id.tank_id = self.tank_id;
                }
                RemoteConnection::Attachment(id)
            }
            Some(Connection::Tank(id)) => RemoteConnection::Tank(id),
            Some(Connection::Account(id)) => RemoteConnection::Account(id),
            // The deposit comes straight from the tank being validated. A
            // tank that does not exist yet cannot appear in any source set.
            None | Some(Connection::SameTank) => match self.tank_id {
                Some(id) => RemoteConnection::Tank(id),
                None => {
                    return Err(ValidationError::new(
                        path,
                        ValidationErrorKind::UnauthorizedNewTankSource,
                    )
                    .into())
                }
            },
        };

        if !authorized.contains(&source) {
            return Err(ValidationError::new(
                path,
                ValidationErrorKind::UnauthorizedRemoteSource { remote_source: source },
            )
            .into());
        }
        Ok(())
    }

    // =========================================================================
    // STRUCTURE-ONLY CHECKS (no schematic context)
    // =========================================================================

    /// Internal consistency checks on an attachment, without a schematic.
    pub fn validate_attachment_structure(attachment: &TankAttachment) -> Result<(), ValidationError> {
        match attachment {
            TankAttachment::FlowMeter(_) => Ok(()),
            TankAttachment::TapOpener(opener) => {
                if let Some(amount) = opener.release_amount.bounded() {
                    if amount <= 0 {
                        return Err(ValidationError::bare(
                            ValidationErrorKind::NonPositiveOpenerRelease,
                        ));
                    }
                }
                Ok(())
            }
            TankAttachment::ConnectAuthority(aca) => {
                aca.connect_authority
                    .ensure_usable("attachment connect authority")
                    .map_err(|err| ValidationError::bare(err))?;
                aca.connect_authority
                    .ensure_nontrivial("attachment connect authority")
                    .map_err(|err| ValidationError::bare(err))?;
                Ok(())
            }
        }
    }

    /// Internal consistency checks on a requirement, without a schematic.
    pub fn validate_requirement_structure(
        requirement: &TapRequirement,
    ) -> Result<(), ValidationError> {
        let non_positive = |what| ValidationError::bare(ValidationErrorKind::NonPositive { what });
        match requirement {
            TapRequirement::ImmediateFlowLimit(req) => {
                if req.limit <= 0 {
                    return Err(non_positive("immediate flow limit"));
                }
            }
            TapRequirement::CumulativeFlowLimit(req) => {
                if req.limit <= 0 {
                    return Err(non_positive("cumulative flow limit"));
                }
            }
            TapRequirement::PeriodicFlowLimit(req) => {
                if req.limit <= 0 {
                    return Err(non_positive("periodic flow limit"));
                }
                if req.period_duration_sec == 0 {
                    return Err(non_positive("periodic flow limit period"));
                }
            }
            TapRequirement::TimeLock(req) => {
                if req.lock_unlock_times.is_empty() {
                    return Err(ValidationError::bare(ValidationErrorKind::EmptyLockTimes));
                }
                let increasing = req
                    .lock_unlock_times
                    .windows(2)
                    .all(|pair| pair[0] < pair[1]);
                if !increasing {
                    return Err(ValidationError::bare(
                        ValidationErrorKind::NonIncreasingLockTimes,
                    ));
                }
            }
            TapRequirement::MinimumTankLevel(req) => {
                if req.minimum_level <= 0 {
                    return Err(non_positive("minimum tank level"));
                }
            }
            TapRequirement::Review(req) => {
                req.reviewer
                    .ensure_usable("reviewer")
                    .map_err(ValidationError::bare)?;
                req.reviewer
                    .ensure_nontrivial("reviewer")
                    .map_err(ValidationError::bare)?;
            }
            TapRequirement::Documentation(_) => {}
            TapRequirement::Delay(req) => {
                if let Some(veto) = &req.veto_authority {
                    veto.ensure_usable("veto authority").map_err(ValidationError::bare)?;
                    veto.ensure_nontrivial("veto authority")
                        .map_err(ValidationError::bare)?;
                }
                if req.delay_period_sec == 0 {
                    return Err(non_positive("delay period"));
                }
            }
            TapRequirement::HashPreimage(req) => {
                if req.hash.is_null() {
                    return Err(ValidationError::bare(ValidationErrorKind::NullHash));
                }
                if req.hash.is_hash_of_empty() {
                    return Err(ValidationError::bare(
                        ValidationErrorKind::HashOfEmptyPreimage,
                    ));
                }
                if let Some(size) = req.preimage_size {
                    if size == 0 {
                        return Err(non_positive("preimage size"));
                    }
                }
            }
            TapRequirement::Ticket(req) => {
                if req.ticket_signer.is_null() {
                    return Err(ValidationError::bare(ValidationErrorKind::NullTicketSigner));
                }
            }
            TapRequirement::Exchange(req) => {
                if req.tick_amount <= 0 {
                    return Err(non_positive("exchange tick amount"));
                }
                if req.release_per_tick <= 0 {
                    return Err(non_positive("exchange release per tick"));
                }
            }
        }
        Ok(())
    }

    /// Internal consistency checks on a tap, without a schematic.
    pub fn validate_tap_structure(tap: &Tap) -> Result<(), ValidationError> {
        if tap.connected_connection.is_none() && tap.connect_authority.is_none() {
            return Err(ValidationError::bare(
                ValidationErrorKind::TapUnconnectedWithoutConnectAuthority,
            ));
        }
        let mut unique = UniquenessChecker::default();
        for requirement in &tap.requirements {
            if !unique.check(requirement.tag(), requirement.unique()) {
                return Err(ValidationError::bare(
                    ValidationErrorKind::DuplicateRequirementType {
                        kind: requirement.kind_name(),
                    },
                ));
            }
            Self::validate_requirement_structure(requirement)?;
        }
        Ok(())
    }

    /// Emergency-tap shape checks on a tap, without a schematic.
    pub fn validate_emergency_tap_structure(tap: &Tap) -> Result<(), ValidationError> {
        if !tap.requirements.is_empty() {
            return Err(ValidationError::bare(
                ValidationErrorKind::EmergencyTapHasRequirements,
            ));
        }
        let open = tap.open_authority.as_ref().ok_or_else(|| {
            ValidationError::bare(ValidationErrorKind::EmergencyTapOpenAuthorityMissing)
        })?;
        open.ensure_usable("emergency tap open authority")
            .map_err(ValidationError::bare)?;
        open.ensure_nontrivial("emergency tap open authority")
            .map_err(ValidationError::bare)?;
        let connect = tap.connect_authority.as_ref().ok_or_else(|| {
            ValidationError::bare(ValidationErrorKind::EmergencyTapConnectAuthorityMissing)
        })?;
        connect
            .ensure_usable("emergency tap connect authority")
            .map_err(ValidationError::bare)?;
        connect
            .ensure_nontrivial("emergency tap connect authority")
            .map_err(ValidationError::bare)?;
        if !tap.destructor_tap {
            return Err(ValidationError::bare(
                ValidationErrorKind::EmergencyTapNotDestructor,
            ));
        }
        Ok(())
    }

    // =========================================================================
    // SUMMARY INFORMATION
    // =========================================================================

    /// Every account the schematic references, through connections, source
    /// sets, and authorities.
    pub fn referenced_accounts(&self) -> BTreeSet<AccountId> {
        let mut accounts = BTreeSet::new();
        let schematic = self.schematic();
        for tap in schematic.taps.values() {
            Self::tap_accounts(&mut accounts, tap);
        }
        for attachment in schematic.attachments.values() {
            Self::attachment_accounts(&mut accounts, attachment);
        }
        Self::sources_accounts(&mut accounts, &schematic.remote_sources);
        accounts
    }

    pub fn tap_accounts(accounts: &mut BTreeSet<AccountId>, tap: &Tap) {
        if let Some(authority) = &tap.open_authority {
            Self::authority_accounts(accounts, authority);
        }
        if let Some(authority) = &tap.connect_authority {
            Self::authority_accounts(accounts, authority);
        }
        if let Some(connection) = &tap.connected_connection {
            Self::connection_accounts(accounts, connection);
        }
        for requirement in &tap.requirements {
            match requirement {
                TapRequirement::Review(req) => Self::authority_accounts(accounts, &req.reviewer),
                TapRequirement::Delay(req) => {
                    if let Some(veto) = &req.veto_authority {
                        Self::authority_accounts(accounts, veto);
                    }
                }
                TapRequirement::Exchange(req) => {
                    if let Some(reset) = &req.reset_authority {
                        Self::authority_accounts(accounts, reset);
                    }
                }
                _ => {}
            }
        }
    }

    pub fn attachment_accounts(accounts: &mut BTreeSet<AccountId>, attachment: &TankAttachment) {
        match attachment {
            TankAttachment::FlowMeter(meter) => {
                Self::connection_accounts(accounts, &meter.destination);
                Self::sources_accounts(accounts, &meter.remote_sources);
                if let Some(reset) = &meter.reset_authority {
                    Self::authority_accounts(accounts, reset);
                }
            }
            TankAttachment::TapOpener(opener) => {
                Self::connection_accounts(accounts, &opener.destination);
                Self::sources_accounts(accounts, &opener.remote_sources);
            }
            TankAttachment::ConnectAuthority(aca) => {
                Self::authority_accounts(accounts, &aca.connect_authority);
            }
        }
    }

    fn connection_accounts(accounts: &mut BTreeSet<AccountId>, connection: &Connection) {
        if let Connection::Account(id) = connection {
            accounts.insert(*id);
        }
    }

    fn sources_accounts(accounts: &mut BTreeSet<AccountId>, sources: &AuthorizedConnections) {
        if let AuthorizedConnections::Sources(sources) = sources {
            for source in sources {
                if let RemoteConnection::Account(id) = source {
                    accounts.insert(*id);
                }
            }
        }
    }

    fn authority_accounts(accounts: &mut BTreeSet<AccountId>, authority: &crate::authority::Authority) {
        accounts.extend(authority.account_auths.keys().copied());
    }

    // =========================================================================
    // DEPOSIT
    // =========================================================================

    /// The deposit this tank requires. Only meaningful after
    /// [`validate_tank`](Self::validate_tank) has run.
    pub fn calculate_deposit(&self, parameters: &TntParameters) -> Result<Amount, ValidationError> {
        if !self.has_validated {
            return Err(ValidationError::bare(ValidationErrorKind::NotYetValidated));
        }
        let mut total = parameters.tank_deposit;
        for tag in &self.attachment_tags {
            total += parameters.accessory_deposit(*tag, parameters.default_tank_attachment_deposit);
        }
        for tag in &self.requirement_tags {
            total += parameters.accessory_deposit(*tag, parameters.default_tap_requirement_deposit);
        }
        Ok(total)
    }

    /// Validate `schematic` and return its deposit in one call.
    pub fn deposit_for(
        schematic: &TankSchematic,
        parameters: &TntParameters,
    ) -> Result<Amount, ProtocolError> {
        let mut validator =
            TankValidator::new(schematic, usize::from(parameters.max_connection_chain_length));
        validator.validate_tank()?;
        Ok(validator.calculate_deposit(parameters)?)
    }

    // Internal destination-asset check shared by meter and opener validation.
    fn check_destination_asset(
        &self,
        destination: &Connection,
        expected: AssetId,
        path: AccessoryPath,
    ) -> Result<(), ProtocolError> {
        match self.lookups.connection_asset(destination) {
            Ok(ConnectionAsset::Any) | Err(LookupError::NeedLookupFunction) => Ok(()),
            Ok(ConnectionAsset::Asset(asset)) if asset == expected => Ok(()),
            Ok(ConnectionAsset::Asset(_)) => Err(ValidationError::new(
                path,
                crate::errors::ConnectionError::ReceivesWrongAsset { connection: *destination },
            )
            .into()),
            Ok(ConnectionAsset::NoAsset(_)) => Err(ValidationError::new(
                path,
                crate::errors::ConnectionError::ReceivesNoAsset { connection: *destination },
            )
            .into()),
            Err(LookupError::NonexistentObject(object)) => {
                Err(ValidationError::new(path, ValidationErrorKind::Nonexistent(object)).into())
            }
        }
    }

    // Sources on the tank being validated are implicit and must not be listed.
    fn check_own_tank_not_authorized(
        &self,
        sources: &AuthorizedConnections,
        path: AccessoryPath,
    ) -> Result<(), ProtocolError> {
        let Some(own_id) = self.tank_id else {
            return Ok(());
        };
        let AuthorizedConnections::Sources(sources) = sources else {
            return Ok(());
        };
        for source in sources {
            if source.connection_tank() == Some(own_id) {
                return Err(ValidationError::new(
                    path,
                    ValidationErrorKind::SameTankSourceAuthorized,
                )
                .into());
            }
        }
        Ok(())
    }
}

impl ValidationError {
    /// Re-anchor a structure-only failure at a concrete accessory path.
    fn at(mut self, path: AccessoryPath) -> Self {
        if self.path == AccessoryPath::none() {
            self.path = path;
        }
        self
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessories::{
        AssetFlowMeter, AttachmentConnectAuthority, CumulativeFlowLimit, ExchangeRequirement,
        ImmediateFlowLimit, TapOpener,
    };
    use crate::authority::Authority;
    use crate::types::{AssetFlowLimit, AttachmentId};

    fn emergency_tap(owner: AccountId) -> Tap {
        Tap {
            connected_connection: Some(Connection::Account(owner)),
            open_authority: Some(Authority::account(owner)),
            connect_authority: Some(Authority::account(owner)),
            requirements: vec![],
            destructor_tap: true,
        }
    }

    fn minimal_schematic() -> TankSchematic {
        let mut schematic = TankSchematic {
            asset_type: AssetId(1),
            ..TankSchematic::default()
        };
        schematic.taps.insert(0, emergency_tap(AccountId(1)));
        schematic.tap_counter = 1;
        schematic
    }

    #[test]
    fn test_minimal_schematic_validates() {
        let schematic = minimal_schematic();
        let mut validator = TankValidator::new(&schematic, 10);
        assert!(validator.validate_tank().is_ok());
    }

    #[test]
    fn test_missing_emergency_tap_fails() {
        let mut schematic = minimal_schematic();
        schematic.taps.clear();
        let mut validator = TankValidator::new(&schematic, 10);
        let err = validator.validate_tank().unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Validation(ValidationError {
                kind: ValidationErrorKind::EmergencyTapMissing,
                ..
            })
        ));
    }

    #[test]
    fn test_emergency_tap_must_be_destructor_with_authorities() {
        let mut schematic = minimal_schematic();
        schematic.taps.get_mut(&0).unwrap().destructor_tap = false;
        let mut validator = TankValidator::new(&schematic, 10);
        assert!(matches!(
            validator.validate_tank().unwrap_err(),
            ProtocolError::Validation(ValidationError {
                kind: ValidationErrorKind::EmergencyTapNotDestructor,
                ..
            })
        ));

        let mut schematic = minimal_schematic();
        schematic.taps.get_mut(&0).unwrap().open_authority = None;
        let mut validator = TankValidator::new(&schematic, 10);
        assert!(matches!(
            validator.validate_tank().unwrap_err(),
            ProtocolError::Validation(ValidationError {
                kind: ValidationErrorKind::EmergencyTapOpenAuthorityMissing,
                ..
            })
        ));

        let mut schematic = minimal_schematic();
        schematic.taps.get_mut(&0).unwrap().requirements =
            vec![TapRequirement::ImmediateFlowLimit(ImmediateFlowLimit { limit: 1 })];
        let mut validator = TankValidator::new(&schematic, 10);
        assert!(matches!(
            validator.validate_tank().unwrap_err(),
            ProtocolError::Validation(ValidationError {
                kind: ValidationErrorKind::EmergencyTapHasRequirements,
                ..
            })
        ));
    }

    #[test]
    fn test_duplicate_unique_requirement_fails() {
        let mut schematic = minimal_schematic();
        let tap = Tap {
            connected_connection: Some(Connection::Account(AccountId(2))),
            requirements: vec![
                TapRequirement::CumulativeFlowLimit(CumulativeFlowLimit { limit: 10 }),
                TapRequirement::CumulativeFlowLimit(CumulativeFlowLimit { limit: 20 }),
            ],
            ..Tap::default()
        };
        schematic.taps.insert(1, tap);
        schematic.tap_counter = 2;
        let mut validator = TankValidator::new(&schematic, 10);
        assert!(matches!(
            validator.validate_tank().unwrap_err(),
            ProtocolError::Validation(ValidationError {
                kind: ValidationErrorKind::DuplicateRequirementType { .. },
                ..
            })
        ));
    }

    #[test]
    fn test_opener_must_reference_existing_tap() {
        let mut schematic = minimal_schematic();
        schematic.attachments.insert(
            0,
            TankAttachment::TapOpener(TapOpener {
                tap_index: 9,
                release_amount: AssetFlowLimit::Amount(5),
                destination: Connection::Account(AccountId(2)),
                remote_sources: AuthorizedConnections::All,
                asset_type: AssetId(1),
            }),
        );
        schematic.attachment_counter = 1;
        let mut validator = TankValidator::new(&schematic, 10);
        assert!(matches!(
            validator.validate_tank().unwrap_err(),
            ProtocolError::Validation(ValidationError {
                kind: ValidationErrorKind::OpenerTapNotFound { tap: 9 },
                ..
            })
        ));
    }

    #[test]
    fn test_connect_authority_target_must_receive_asset() {
        let mut schematic = minimal_schematic();
        schematic.attachments.insert(
            0,
            TankAttachment::ConnectAuthority(AttachmentConnectAuthority {
                connect_authority: Authority::account(AccountId(3)),
                attachment_index: 0,
            }),
        );
        schematic.attachment_counter = 1;
        let mut validator = TankValidator::new(&schematic, 10);
        assert!(matches!(
            validator.validate_tank().unwrap_err(),
            ProtocolError::Validation(ValidationError {
                kind: ValidationErrorKind::ReconnectTargetReceivesNoAsset { .. },
                ..
            })
        ));
    }

    #[test]
    fn test_meter_destination_asset_must_match() {
        let mut schematic = minimal_schematic();
        schematic.attachments.insert(
            0,
            TankAttachment::FlowMeter(AssetFlowMeter {
                asset_type: AssetId(2),
                // SameTank receives asset 1, but the meter carries asset 2.
                destination: Connection::SameTank,
                remote_sources: AuthorizedConnections::All,
                reset_authority: None,
            }),
        );
        schematic.attachment_counter = 1;
        let mut validator = TankValidator::new(&schematic, 10);
        assert!(matches!(
            validator.validate_tank().unwrap_err(),
            ProtocolError::Validation(ValidationError {
                kind: ValidationErrorKind::Connection(_),
                ..
            })
        ));
    }

    #[test]
    fn test_exchange_meter_must_be_a_meter() {
        let mut schematic = minimal_schematic();
        schematic.attachments.insert(
            0,
            TankAttachment::TapOpener(TapOpener {
                tap_index: 0,
                release_amount: AssetFlowLimit::Unlimited,
                destination: Connection::SameTank,
                remote_sources: AuthorizedConnections::All,
                asset_type: AssetId(1),
            }),
        );
        schematic.attachment_counter = 1;
        schematic.taps.insert(
            1,
            Tap {
                connected_connection: Some(Connection::Account(AccountId(2))),
                requirements: vec![TapRequirement::Exchange(ExchangeRequirement {
                    meter_id: AttachmentId::new(None, 0),
                    release_per_tick: 1,
                    tick_amount: 1,
                    reset_authority: None,
                })],
                ..Tap::default()
            },
        );
        schematic.tap_counter = 2;
        let mut validator = TankValidator::new(&schematic, 10);
        assert!(matches!(
            validator.validate_tank().unwrap_err(),
            ProtocolError::Validation(ValidationError {
                kind: ValidationErrorKind::ExchangeMeterNotAMeter { .. },
                ..
            })
        ));
    }

    #[test]
    fn test_deposit_requires_validation_and_charges_per_kind() {
        let mut schematic = minimal_schematic();
        schematic.taps.insert(
            1,
            Tap {
                connected_connection: Some(Connection::Account(AccountId(2))),
                requirements: vec![
                    TapRequirement::ImmediateFlowLimit(ImmediateFlowLimit { limit: 10 }),
                    TapRequirement::CumulativeFlowLimit(CumulativeFlowLimit { limit: 100 }),
                ],
                ..Tap::default()
            },
        );
        schematic.tap_counter = 2;

        let params = TntParameters::default();
        let validator = TankValidator::new(&schematic, 10);
        assert!(validator.calculate_deposit(&params).is_err());

        let mut validator = TankValidator::new(&schematic, 10);
        validator.validate_tank().unwrap();
        let deposit = validator.calculate_deposit(&params).unwrap();
        // Base + immediate (stateless) + cumulative (stateful premium).
        assert_eq!(
            deposit,
            params.tank_deposit
                + params.default_tap_requirement_deposit
                + params.default_tap_requirement_deposit
                + params.stateful_accessory_deposit_premium
        );
    }

    #[test]
    fn test_deposit_is_pure_and_idempotent() {
        let schematic = minimal_schematic();
        let params = TntParameters::default();
        let first = TankValidator::deposit_for(&schematic, &params).unwrap();
        let second = TankValidator::deposit_for(&schematic, &params).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_referenced_accounts_cover_authorities_and_connections() {
        let mut schematic = minimal_schematic();
        schematic.taps.insert(
            1,
            Tap {
                connected_connection: Some(Connection::Account(AccountId(7))),
                open_authority: Some(Authority::account(AccountId(8))),
                requirements: vec![TapRequirement::Review(crate::accessories::ReviewRequirement {
                    reviewer: Authority::account(AccountId(9)),
                    request_limit: 2,
                })],
                ..Tap::default()
            },
        );
        schematic.tap_counter = 2;
        schematic.remote_sources =
            AuthorizedConnections::sources([RemoteConnection::Account(AccountId(10))]);

        let validator = TankValidator::new(&schematic, 10);
        let accounts = validator.referenced_accounts();
        for id in [1, 7, 8, 9, 10] {
            assert!(accounts.contains(&AccountId(id)), "missing account {id}");
        }
    }
}
