use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::MAX_NOTES_LEN;

/// Inclusive calendar range `[start, end]`. Both ends are booked days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start < end, "DateRange start must be before end");
        Self { start, end }
    }

    /// `None` unless `start < end`.
    pub fn checked(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// Inclusive overlap: sharing a single boundary day counts.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn contains_date(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    /// Same-length range moved `days` forward. `None` past the calendar's end.
    pub fn shifted(&self, days: u64) -> Option<DateRange> {
        Some(Self {
            start: self.start.checked_add_days(Days::new(days))?,
            end: self.end.checked_add_days(Days::new(days))?,
        })
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

// ── Enumerations ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {:?}", self.kind, self.value)
    }
}

impl std::error::Error for ParseEnumError {}

/// Lowercase, trim, and fold `-`/space separators to `_`.
fn normalize(s: &str) -> String {
    s.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == '-' || c == ' ' { '_' } else { c })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SpaceType {
    Coworking,
    PrivateOffice,
    Domiciliation,
}

impl SpaceType {
    pub const ALL: [SpaceType; 3] = [
        SpaceType::Coworking,
        SpaceType::PrivateOffice,
        SpaceType::Domiciliation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SpaceType::Coworking => "coworking",
            SpaceType::PrivateOffice => "bureau-prive",
            SpaceType::Domiciliation => "domiciliation",
        }
    }

    /// Map a UI-facing slug to its canonical type.
    pub fn from_slug(slug: &str) -> Option<SpaceType> {
        match normalize(slug).as_str() {
            "coworking" | "co_working" | "open_space" => Some(SpaceType::Coworking),
            "bureau_prive" | "bureau_privé" | "private_office" | "bureau" | "office" => {
                Some(SpaceType::PrivateOffice)
            }
            "domiciliation" | "domiciliation_entreprise" => Some(SpaceType::Domiciliation),
            _ => None,
        }
    }
}

impl fmt::Display for SpaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpaceType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SpaceType::from_slug(s).ok_or_else(|| ParseEnumError {
            kind: "space type",
            value: s.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Completed => "completed",
            ReservationStatus::Cancelled => "cancelled",
        }
    }

    /// No automatic transition ever leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReservationStatus::Completed | ReservationStatus::Cancelled)
    }

    /// Occupies the space right now if today falls inside the stay.
    pub fn is_active(&self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Confirmed)
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "pending" | "en_attente" => Ok(ReservationStatus::Pending),
            "confirmed" | "confirmee" | "confirmée" => Ok(ReservationStatus::Confirmed),
            "completed" | "terminee" | "terminée" => Ok(ReservationStatus::Completed),
            "cancelled" | "canceled" | "annulee" | "annulée" => Ok(ReservationStatus::Cancelled),
            _ => Err(ParseEnumError {
                kind: "status",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    Cash,
    Card,
    OrangeMoney,
    MtnMoney,
    MoovMoney,
    Wave,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::OrangeMoney => "orange_money",
            PaymentMethod::MtnMoney => "mtn_money",
            PaymentMethod::MoovMoney => "moov_money",
            PaymentMethod::Wave => "wave",
        }
    }

    pub fn is_mobile_money(&self) -> bool {
        matches!(
            self,
            PaymentMethod::OrangeMoney
                | PaymentMethod::MtnMoney
                | PaymentMethod::MoovMoney
                | PaymentMethod::Wave
        )
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "cash" | "especes" | "espèces" => Ok(PaymentMethod::Cash),
            "card" | "carte" | "carte_bancaire" => Ok(PaymentMethod::Card),
            "orange_money" | "orange" => Ok(PaymentMethod::OrangeMoney),
            "mtn_money" | "mtn" | "momo" => Ok(PaymentMethod::MtnMoney),
            "moov_money" | "moov" | "flooz" => Ok(PaymentMethod::MoovMoney),
            "wave" => Ok(PaymentMethod::Wave),
            _ => Err(ParseEnumError {
                kind: "payment method",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionType {
    Daily,
    Monthly,
    Yearly,
}

impl SubscriptionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionType::Daily => "daily",
            SubscriptionType::Monthly => "monthly",
            SubscriptionType::Yearly => "yearly",
        }
    }
}

impl fmt::Display for SubscriptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "daily" | "jour" | "journalier" => Ok(SubscriptionType::Daily),
            "monthly" | "mois" | "mensuel" => Ok(SubscriptionType::Monthly),
            "yearly" | "annual" | "annee" | "année" | "annuel" => Ok(SubscriptionType::Yearly),
            _ => Err(ParseEnumError {
                kind: "subscription type",
                value: s.to_string(),
            }),
        }
    }
}

// ── Reservation ─────────────────────────────────────────────────

/// Profile fields carried through from the booking form. Not validated beyond length.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub company: Option<String>,
    pub activity: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub space_type: SpaceType,
    pub occupants: u32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Whole currency units.
    pub amount: i64,
    pub payment_method: PaymentMethod,
    pub subscription_type: SubscriptionType,
    pub status: ReservationStatus,
    pub contact: Contact,
    /// Audit trail. Automatic transitions append one line each.
    pub admin_notes: Option<String>,
}

impl Reservation {
    pub fn range(&self) -> DateRange {
        DateRange {
            start: self.start_date,
            end: self.end_date,
        }
    }

    /// Midnight UTC at the start of `end_date`.
    pub fn end_instant(&self) -> DateTime<Utc> {
        self.end_date.and_time(NaiveTime::MIN).and_utc()
    }

    /// Append an audit line, dropping the oldest lines once the trail would
    /// exceed `MAX_NOTES_LEN`. The newest line is always kept.
    pub fn append_note(&mut self, line: &str) {
        let mut notes = self.admin_notes.take().unwrap_or_default();
        if !notes.is_empty() {
            notes.push('\n');
        }
        notes.push_str(line);
        while notes.len() > MAX_NOTES_LEN {
            match notes.find('\n') {
                Some(i) => {
                    notes.drain(..=i);
                }
                None => {
                    let mut cut = notes.len() - MAX_NOTES_LEN;
                    while !notes.is_char_boundary(cut) {
                        cut += 1;
                    }
                    notes.drain(..cut);
                }
            }
        }
        self.admin_notes = Some(notes);
    }
}

/// Fields supplied by the booking wizard when creating a reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub id: Option<Ulid>,
    pub space_type: SpaceType,
    pub occupants: u32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub payment_method: PaymentMethod,
    pub subscription_type: SubscriptionType,
    pub contact: Contact,
    /// Quoted from the catalog when absent.
    pub amount: Option<i64>,
    /// Defaults to pending.
    pub status: Option<ReservationStatus>,
    pub admin_notes: Option<String>,
}

/// Partial update. `expected_status` turns the write into a compare-and-set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationPatch {
    pub expected_status: Option<ReservationStatus>,
    pub status: Option<ReservationStatus>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub occupants: Option<u32>,
    pub amount: Option<i64>,
    pub payment_method: Option<PaymentMethod>,
    pub subscription_type: Option<SubscriptionType>,
    /// Replaces the notes wholesale.
    pub admin_notes: Option<String>,
    /// Appended as a new line after any replacement.
    pub append_note: Option<String>,
}

impl ReservationPatch {
    /// Conditional status change with an audit line.
    pub fn transition(from: ReservationStatus, to: ReservationStatus, note: String) -> Self {
        Self {
            expected_status: Some(from),
            status: Some(to),
            append_note: Some(note),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        let Self {
            expected_status: _,
            status,
            start_date,
            end_date,
            occupants,
            amount,
            payment_method,
            subscription_type,
            admin_notes,
            append_note,
        } = self;
        status.is_none()
            && start_date.is_none()
            && end_date.is_none()
            && occupants.is_none()
            && amount.is_none()
            && payment_method.is_none()
            && subscription_type.is_none()
            && admin_notes.is_none()
            && append_note.is_none()
    }
}

/// Row filter for `ReservationStore::select`. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    pub space_type: Option<SpaceType>,
    pub statuses: Option<Vec<ReservationStatus>>,
    pub exclude_status: Option<ReservationStatus>,
    pub payment_method: Option<PaymentMethod>,
    /// Strictly before.
    pub created_before: Option<DateTime<Utc>>,
    pub end_on_or_before: Option<NaiveDate>,
    pub email: Option<String>,
    pub overlapping: Option<DateRange>,
}

impl ReservationFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn space_type(mut self, space_type: SpaceType) -> Self {
        self.space_type = Some(space_type);
        self
    }

    pub fn status(mut self, status: ReservationStatus) -> Self {
        self.statuses = Some(vec![status]);
        self
    }

    pub fn status_in(mut self, statuses: &[ReservationStatus]) -> Self {
        self.statuses = Some(statuses.to_vec());
        self
    }

    pub fn not_status(mut self, status: ReservationStatus) -> Self {
        self.exclude_status = Some(status);
        self
    }

    pub fn payment_method(mut self, method: PaymentMethod) -> Self {
        self.payment_method = Some(method);
        self
    }

    pub fn created_before(mut self, at: DateTime<Utc>) -> Self {
        self.created_before = Some(at);
        self
    }

    pub fn end_on_or_before(mut self, day: NaiveDate) -> Self {
        self.end_on_or_before = Some(day);
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn overlapping(mut self, range: DateRange) -> Self {
        self.overlapping = Some(range);
        self
    }

    pub fn matches(&self, r: &Reservation) -> bool {
        self.space_type.is_none_or(|t| r.space_type == t)
            && self.statuses.as_ref().is_none_or(|s| s.contains(&r.status))
            && self.exclude_status.is_none_or(|s| r.status != s)
            && self.payment_method.is_none_or(|m| r.payment_method == m)
            && self.created_before.is_none_or(|t| r.created_at < t)
            && self.end_on_or_before.is_none_or(|d| r.end_date <= d)
            && self
                .email
                .as_deref()
                .is_none_or(|e| r.contact.email.eq_ignore_ascii_case(e.trim()))
            && self.overlapping.is_none_or(|q| r.range().overlaps(&q))
    }
}

// ── Per-space partition ─────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SpaceState {
    pub space_type: SpaceType,
    /// All reservations of this type, sorted by `start_date`.
    pub reservations: Vec<Reservation>,
}

impl SpaceState {
    pub fn new(space_type: SpaceType) -> Self {
        Self {
            space_type,
            reservations: Vec::new(),
        }
    }

    /// Insert maintaining sort order by start_date.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.start_date <= reservation.start_date);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn get(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    /// Replace a reservation by id, re-sorting if its start moved.
    pub fn replace_reservation(&mut self, reservation: Reservation) {
        self.remove_reservation(reservation.id);
        self.insert_reservation(reservation);
    }

    /// Reservations whose inclusive range overlaps `query`.
    /// Binary search skips everything starting after `query.end`.
    pub fn overlapping(&self, query: DateRange) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.start_date <= query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.end_date >= query.start)
    }

    /// The conflict set: overlapping and not cancelled, optionally ignoring one id.
    pub fn conflicts(
        &self,
        query: DateRange,
        ignore: Option<Ulid>,
    ) -> impl Iterator<Item = &Reservation> {
        self.overlapping(query).filter(move |r| {
            r.status != ReservationStatus::Cancelled && ignore.is_none_or(|id| r.id != id)
        })
    }
}

/// WAL record. Updates carry the full after-image so replay is a plain overwrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationCreated { reservation: Reservation },
    ReservationUpdated { reservation: Reservation },
    ReservationDeleted { id: Ulid, space_type: SpaceType },
}

impl Event {
    pub fn space_type(&self) -> SpaceType {
        match self {
            Event::ReservationCreated { reservation } | Event::ReservationUpdated { reservation } => {
                reservation.space_type
            }
            Event::ReservationDeleted { space_type, .. } => *space_type,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn range_overlap_is_inclusive() {
        let a = DateRange::new(day("2024-04-01"), day("2024-04-03"));
        let touching = DateRange::new(day("2024-04-03"), day("2024-04-05"));
        let after = DateRange::new(day("2024-04-04"), day("2024-04-06"));
        assert!(a.overlaps(&touching));
        assert!(touching.overlaps(&a));
        assert!(!a.overlaps(&after));
    }

    #[test]
    fn range_checked_rejects_zero_length() {
        assert!(DateRange::checked(day("2024-04-01"), day("2024-04-01")).is_none());
        assert!(DateRange::checked(day("2024-04-02"), day("2024-04-01")).is_none());
        assert_eq!(
            DateRange::checked(day("2024-04-01"), day("2024-04-03")).map(|r| r.duration_days()),
            Some(2)
        );
    }

    #[test]
    fn range_shift_keeps_length() {
        let r = DateRange::new(day("2024-02-27"), day("2024-03-01"));
        let s = r.shifted(3).unwrap();
        assert_eq!(s.start, day("2024-03-01"));
        assert_eq!(s.end, day("2024-03-04"));
        assert_eq!(s.duration_days(), r.duration_days());
    }

    #[test]
    fn slugs_map_to_canonical_types() {
        assert_eq!(SpaceType::from_slug("coworking"), Some(SpaceType::Coworking));
        assert_eq!(SpaceType::from_slug(" Open-Space "), Some(SpaceType::Coworking));
        assert_eq!(SpaceType::from_slug("bureau-prive"), Some(SpaceType::PrivateOffice));
        assert_eq!(SpaceType::from_slug("private-office"), Some(SpaceType::PrivateOffice));
        assert_eq!(SpaceType::from_slug("DOMICILIATION"), Some(SpaceType::Domiciliation));
        assert_eq!(SpaceType::from_slug("salle-de-reunion"), None);
        assert_eq!(SpaceType::from_slug(""), None);
    }

    #[test]
    fn canonical_names_round_trip_through_from_str() {
        for t in SpaceType::ALL {
            assert_eq!(t.as_str().parse::<SpaceType>().unwrap(), t);
        }
        for s in ["pending", "confirmed", "completed", "cancelled"] {
            assert_eq!(s.parse::<ReservationStatus>().unwrap().as_str(), s);
        }
    }

    #[test]
    fn payment_method_aliases() {
        assert_eq!("espèces".parse::<PaymentMethod>().unwrap(), PaymentMethod::Cash);
        assert_eq!("Orange Money".parse::<PaymentMethod>().unwrap(), PaymentMethod::OrangeMoney);
        assert!(PaymentMethod::Wave.is_mobile_money());
        assert!(!PaymentMethod::Cash.is_mobile_money());
        let err = "cheque".parse::<PaymentMethod>().unwrap_err();
        assert!(err.to_string().contains("payment method"));
    }

    #[test]
    fn terminal_statuses() {
        assert!(ReservationStatus::Completed.is_terminal());
        assert!(ReservationStatus::Cancelled.is_terminal());
        assert!(!ReservationStatus::Pending.is_terminal());
        assert!(!ReservationStatus::Confirmed.is_terminal());
    }

    #[test]
    fn append_note_builds_lines() {
        let mut r = reservation(
            SpaceType::Coworking,
            ReservationStatus::Pending,
            "2024-03-01",
            "2024-03-05",
            "2024-02-20T10:00:00Z",
        );
        r.append_note("first");
        r.append_note("second");
        assert_eq!(r.admin_notes.as_deref(), Some("first\nsecond"));
    }

    #[test]
    fn append_note_drops_oldest_lines_at_limit() {
        let mut r = reservation(
            SpaceType::Coworking,
            ReservationStatus::Pending,
            "2024-03-01",
            "2024-03-05",
            "2024-02-20T10:00:00Z",
        );
        r.admin_notes = Some(format!("old\n{}", "x".repeat(MAX_NOTES_LEN - 4)));
        r.append_note("cancelled automatically");
        let notes = r.admin_notes.as_deref().unwrap();
        assert!(notes.len() <= MAX_NOTES_LEN);
        assert!(!notes.starts_with("old"));
        assert!(notes.ends_with("\ncancelled automatically"));

        // A single oversized line is cut from the front
        r.admin_notes = None;
        r.append_note(&"é".repeat(MAX_NOTES_LEN));
        assert!(r.admin_notes.as_deref().unwrap().len() <= MAX_NOTES_LEN);
    }

    #[test]
    fn end_instant_is_midnight_utc() {
        let r = reservation(
            SpaceType::Coworking,
            ReservationStatus::Confirmed,
            "2024-03-01",
            "2024-03-05",
            "2024-02-20T10:00:00Z",
        );
        assert_eq!(r.end_instant(), instant("2024-03-05T00:00:00Z"));
    }

    #[test]
    fn filter_combines_predicates() {
        let mut r = reservation(
            SpaceType::PrivateOffice,
            ReservationStatus::Pending,
            "2024-03-01",
            "2024-03-05",
            "2024-02-20T10:00:00Z",
        );
        r.payment_method = PaymentMethod::Cash;

        let f = ReservationFilter::all()
            .payment_method(PaymentMethod::Cash)
            .status(ReservationStatus::Pending)
            .created_before(instant("2024-02-21T00:00:00Z"));
        assert!(f.matches(&r));

        // created_before is strict
        let f = ReservationFilter::all().created_before(instant("2024-02-20T10:00:00Z"));
        assert!(!f.matches(&r));

        let f = ReservationFilter::all().not_status(ReservationStatus::Pending);
        assert!(!f.matches(&r));

        let f = ReservationFilter::all().email("AWA@example.com ");
        assert!(f.matches(&r));

        let f = ReservationFilter::all().space_type(SpaceType::Coworking);
        assert!(!f.matches(&r));
    }

    #[test]
    fn space_state_keeps_start_order() {
        let mut ss = SpaceState::new(SpaceType::Coworking);
        for (s, e) in [
            ("2024-03-10", "2024-03-12"),
            ("2024-03-01", "2024-03-02"),
            ("2024-03-05", "2024-03-07"),
        ] {
            ss.insert_reservation(reservation(
                SpaceType::Coworking,
                ReservationStatus::Confirmed,
                s,
                e,
                "2024-02-01T00:00:00Z",
            ));
        }
        let starts: Vec<_> = ss.reservations.iter().map(|r| r.start_date).collect();
        assert_eq!(starts, vec![day("2024-03-01"), day("2024-03-05"), day("2024-03-10")]);
    }

    #[test]
    fn overlapping_uses_inclusive_bounds() {
        let mut ss = SpaceState::new(SpaceType::Coworking);
        let ends_on_start = reservation(
            SpaceType::Coworking,
            ReservationStatus::Confirmed,
            "2024-03-28",
            "2024-04-01",
            "2024-02-01T00:00:00Z",
        );
        let starts_on_end = reservation(
            SpaceType::Coworking,
            ReservationStatus::Confirmed,
            "2024-04-03",
            "2024-04-09",
            "2024-02-01T00:00:00Z",
        );
        let before = reservation(
            SpaceType::Coworking,
            ReservationStatus::Confirmed,
            "2024-03-01",
            "2024-03-31",
            "2024-02-01T00:00:00Z",
        );
        let after = reservation(
            SpaceType::Coworking,
            ReservationStatus::Confirmed,
            "2024-04-04",
            "2024-04-09",
            "2024-02-01T00:00:00Z",
        );
        for r in [ends_on_start.clone(), starts_on_end.clone(), before, after] {
            ss.insert_reservation(r);
        }
        let query = DateRange::new(day("2024-04-01"), day("2024-04-03"));
        let mut hits: Vec<_> = ss.overlapping(query).map(|r| r.id).collect();
        hits.sort();
        let mut expected = vec![ends_on_start.id, starts_on_end.id];
        expected.sort();
        assert_eq!(hits, expected);
    }

    #[test]
    fn conflicts_skip_cancelled_and_ignored() {
        let mut ss = SpaceState::new(SpaceType::PrivateOffice);
        let cancelled = reservation(
            SpaceType::PrivateOffice,
            ReservationStatus::Cancelled,
            "2024-04-01",
            "2024-04-03",
            "2024-02-01T00:00:00Z",
        );
        let live = reservation(
            SpaceType::PrivateOffice,
            ReservationStatus::Pending,
            "2024-04-02",
            "2024-04-05",
            "2024-02-01T00:00:00Z",
        );
        ss.insert_reservation(cancelled);
        ss.insert_reservation(live.clone());
        let query = DateRange::new(day("2024-04-01"), day("2024-04-03"));
        assert_eq!(ss.conflicts(query, None).count(), 1);
        assert_eq!(ss.conflicts(query, Some(live.id)).count(), 0);
    }

    #[test]
    fn remove_nonexistent_returns_none() {
        let mut ss = SpaceState::new(SpaceType::Domiciliation);
        assert!(ss.remove_reservation(Ulid::new()).is_none());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ReservationCreated {
            reservation: reservation(
                SpaceType::Domiciliation,
                ReservationStatus::Pending,
                "2024-03-01",
                "2024-06-01",
                "2024-02-20T10:00:00Z",
            ),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
