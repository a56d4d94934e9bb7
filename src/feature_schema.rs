// feature_schema.rs
use serde::{Deserialize, Serialize};

/// One named count reported per station in a result protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Feature {
    VotersRegistered,
    BallotsReceived,
    BallotsIssuedEarly,
    BallotsIssuedInside,
    BallotsIssuedOutside,
    BallotsCancelled,
    BallotsInPortableBoxes,
    BallotsInStationaryBoxes,
    InvalidBallots,
    ValidBallots,
    AbsenteeCertificatesReceived,
    AbsenteeCertificatesIssued,
    AbsenteeVoters,
    AbsenteeCertificatesCancelled,
    AbsenteeCertificatesIssuedByTerritorial,
    AbsenteeCertificatesLost,
    BallotsLost,
    BallotsUnaccounted,
    SpravedlivayaRossiya,
    Ldpr,
    PatriotyRossii,
    Kprf,
    Yabloko,
    EdinayaRossiya,
    Pravo,
}

impl Feature {
    /// The 18 ballot/certificate counts, in protocol order.
    pub const COUNTS: [Feature; 18] = [
        Feature::VotersRegistered,
        Feature::BallotsReceived,
        Feature::BallotsIssuedEarly,
        Feature::BallotsIssuedInside,
        Feature::BallotsIssuedOutside,
        Feature::BallotsCancelled,
        Feature::BallotsInPortableBoxes,
        Feature::BallotsInStationaryBoxes,
        Feature::InvalidBallots,
        Feature::ValidBallots,
        Feature::AbsenteeCertificatesReceived,
        Feature::AbsenteeCertificatesIssued,
        Feature::AbsenteeVoters,
        Feature::AbsenteeCertificatesCancelled,
        Feature::AbsenteeCertificatesIssuedByTerritorial,
        Feature::AbsenteeCertificatesLost,
        Feature::BallotsLost,
        Feature::BallotsUnaccounted,
    ];

    /// The 7 party lines, in protocol order.
    pub const PARTIES: [Feature; 7] = [
        Feature::SpravedlivayaRossiya,
        Feature::Ldpr,
        Feature::PatriotyRossii,
        Feature::Kprf,
        Feature::Yabloko,
        Feature::EdinayaRossiya,
        Feature::Pravo,
    ];

    /// Every feature a joined station must carry.
    pub fn required() -> impl Iterator<Item = Feature> {
        Self::COUNTS.into_iter().chain(Self::PARTIES)
    }

    /// Row label as printed on the result page (truncations are the source's own).
    pub fn label(self) -> &'static str {
        match self {
            Feature::VotersRegistered => "Число избирателей, внесенных в список избирателей",
            Feature::BallotsReceived => {
                "Число избирательных бюллетеней, полученных участковой избирательной комиссией"
            }
            Feature::BallotsIssuedEarly => {
                "Число избирательных бюллетеней, выданных избирателям, проголосовавшим досрочно"
            }
            Feature::BallotsIssuedInside => {
                "Число избирательных бюллетеней, выданных избирателям в помещении для голосования"
            }
            Feature::BallotsIssuedOutside => {
                "Число избирательных бюллетеней, выданных избирателям вне помещения для голосования"
            }
            Feature::BallotsCancelled => "Число погашенных избирательных бюллетене",
            Feature::BallotsInPortableBoxes => {
                "Число избирательных бюллетеней в переносных ящиках для голосования"
            }
            Feature::BallotsInStationaryBoxes => {
                "Число избирательных бюллетеней в стационарных ящиках для голосования"
            }
            Feature::InvalidBallots => "Число недействительных избирательных бюллетеней",
            Feature::ValidBallots => "Число действительных избирательных бюллетеней",
            Feature::AbsenteeCertificatesReceived => {
                "Число открепительных удостоверений, полученных участковой избирательной комиссие"
            }
            Feature::AbsenteeCertificatesIssued => {
                "Число открепительных удостоверений, выданных избирателям на избирательном участк"
            }
            Feature::AbsenteeVoters => {
                "Число избирателей, проголосовавших по открепительным удостоверениям на избирательном участке"
            }
            Feature::AbsenteeCertificatesCancelled => {
                "Число погашенных неиспользованных открепительных удостоверений"
            }
            Feature::AbsenteeCertificatesIssuedByTerritorial => {
                "Число открепительных удостоверений, выданных избирателям территориальной избирательной комиссией"
            }
            Feature::AbsenteeCertificatesLost => "Число утраченных открепительных удостоверений",
            Feature::BallotsLost => "Число утраченных избирательных бюллетене",
            Feature::BallotsUnaccounted => "Число избирательных бюллетеней, не учтенных при получени",
            Feature::SpravedlivayaRossiya => "Политическая партия СПРАВЕДЛИВАЯ РОССИЯ",
            Feature::Ldpr => "Политическая партия \"Либерально-демократическая партия России\"",
            Feature::PatriotyRossii => "Политическая партия \"ПАТРИОТЫ РОССИИ\"",
            Feature::Kprf => "Политическая партия \"Коммунистическая партия Российской Федерации\"",
            Feature::Yabloko => {
                "Политическая партия \"Российская объединенная демократическая партия \"ЯБЛОКО\""
            }
            Feature::EdinayaRossiya => "Всероссийская политическая партия \"ЕДИНАЯ РОССИЯ\"",
            Feature::Pravo => "Всероссийская политическая партия \"ПРАВО\"",
        }
    }
}

/// Positional mapping from result-table rows (after the header) to features.
///
/// A `None` slot marks a row that carries no count of interest and is skipped.
/// The order is a property of the data source; parsers, stored cells and the
/// join all depend on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSchema {
    slots: Vec<Option<Feature>>,
}

impl FeatureSchema {
    pub fn new(slots: Vec<Option<Feature>>) -> Self {
        Self { slots }
    }

    /// Row layout of the 2011 State Duma precinct protocol: 18 counts, a
    /// separator row, then 7 parties.
    pub fn duma_2011() -> Self {
        let slots = Feature::COUNTS
            .into_iter()
            .map(Some)
            .chain(std::iter::once(None))
            .chain(Feature::PARTIES.into_iter().map(Some))
            .collect();
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Feature at row `index`; `None` for separator slots and out-of-range rows.
    pub fn slot(&self, index: usize) -> Option<Feature> {
        self.slots.get(index).copied().flatten()
    }

    pub fn position(&self, feature: Feature) -> Option<usize> {
        self.slots.iter().position(|slot| *slot == Some(feature))
    }

    pub fn feature_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn slots(&self) -> &[Option<Feature>] {
        &self.slots
    }
}

impl Default for FeatureSchema {
    fn default() -> Self {
        Self::duma_2011()
    }
}
