use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Local, NaiveDate};
use registre_core::{
    cache::ExportCache,
    model::{BSD_TYPES, DateRange, EstablishmentAccess, RegistryDirection},
    service::{ExportFilters, ExportService, FilterNotice},
};

const INPUT_DATE: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Screen {
    EstablishmentSelect,
    ExportForm,
    ExportResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FormField {
    Direction,
    Start,
    End,
    Types,
    DateFilter,
}

impl FormField {
    const ORDER: [Self; 5] = [
        Self::Direction,
        Self::Start,
        Self::End,
        Self::Types,
        Self::DateFilter,
    ];

    fn position(self) -> usize {
        Self::ORDER
            .iter()
            .position(|field| *field == self)
            .unwrap_or_default()
    }

    pub(crate) fn next(self) -> Self {
        Self::ORDER
            .get(self.position() + 1)
            .copied()
            .unwrap_or(Self::Direction)
    }

    pub(crate) fn previous(self) -> Self {
        self.position()
            .checked_sub(1)
            .and_then(|idx| Self::ORDER.get(idx).copied())
            .unwrap_or(Self::DateFilter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DirectionChoice {
    Single(RegistryDirection),
    Both,
}

impl DirectionChoice {
    pub(crate) fn cycle(self) -> Self {
        match self {
            Self::Single(RegistryDirection::Outgoing) => Self::Single(RegistryDirection::Incoming),
            Self::Single(RegistryDirection::Incoming) => Self::Both,
            Self::Both => Self::Single(RegistryDirection::Outgoing),
        }
    }

    pub(crate) fn label(self) -> &'static str {
        match self {
            Self::Single(direction) => direction.label(),
            Self::Both => "Registres entrant et sortant",
        }
    }
}

/// Validated form content, ready to run.
pub(crate) struct ExportPlan {
    pub establishment: EstablishmentAccess,
    pub directions: DirectionChoice,
    pub range: DateRange,
    pub filters: ExportFilters,
}

/// Outcome of one exported registry.
pub(crate) struct ExportSummary {
    pub direction: RegistryDirection,
    pub saved_to: PathBuf,
    pub rows: Option<usize>,
    pub filtered: bool,
    pub recovered: bool,
    pub notices: Vec<FilterNotice>,
}

pub(crate) struct App {
    pub service: Arc<ExportService>,
    pub output_dir: PathBuf,
    pub cache: ExportCache,

    pub screen: Screen,
    pub establishments: Vec<EstablishmentAccess>,
    pub establishment_index: usize,
    pub selected_establishment: Option<EstablishmentAccess>,

    pub focus: FormField,
    pub directions: DirectionChoice,
    pub start_input: String,
    pub end_input: String,
    pub type_index: usize,
    pub selected_types: [bool; BSD_TYPES.len()],
    pub date_filter: bool,

    pub results: Vec<ExportSummary>,

    pub is_loading: bool,
    pub error_message: Option<String>,
}

impl App {
    pub(crate) fn new(service: Arc<ExportService>, output_dir: PathBuf) -> Self {
        let range = DateRange::current_month(today());
        Self {
            service,
            output_dir,
            cache: ExportCache::new(),
            screen: Screen::EstablishmentSelect,
            establishments: Vec::new(),
            establishment_index: 0,
            selected_establishment: None,
            focus: FormField::Direction,
            directions: DirectionChoice::Single(RegistryDirection::Outgoing),
            start_input: range.start().format(INPUT_DATE).to_string(),
            end_input: range.end().format(INPUT_DATE).to_string(),
            type_index: 0,
            selected_types: [true; BSD_TYPES.len()],
            date_filter: false,
            results: Vec::new(),
            is_loading: false,
            error_message: None,
        }
    }

    pub(crate) fn select_current_establishment(&mut self) {
        let Some(establishment) = self.establishments.get(self.establishment_index).cloned() else {
            return;
        };
        if self.selected_establishment.as_ref() != Some(&establishment) {
            // Cached exports belong to the previous establishment.
            self.cache.clear();
            self.results.clear();
        }
        self.selected_establishment = Some(establishment);
        self.screen = Screen::ExportForm;
        self.error_message = None;
    }

    pub(crate) fn toggle_current_type(&mut self) {
        if let Some(selected) = self.selected_types.get_mut(self.type_index) {
            *selected = !*selected;
        }
    }

    pub(crate) fn toggle_all_types(&mut self) {
        let all = self.all_types_selected();
        self.selected_types = [!all; BSD_TYPES.len()];
    }

    pub(crate) fn all_types_selected(&self) -> bool {
        self.selected_types.iter().all(|selected| *selected)
    }

    /// Complete registry: full history, every type, no date filter.
    pub(crate) fn use_full_history(&mut self) {
        let range = DateRange::full_history(today());
        self.start_input = range.start().format(INPUT_DATE).to_string();
        self.end_input = range.end().format(INPUT_DATE).to_string();
        self.selected_types = [true; BSD_TYPES.len()];
        self.date_filter = false;
    }

    pub(crate) fn focused_input(&mut self) -> Option<&mut String> {
        match self.focus {
            FormField::Start => Some(&mut self.start_input),
            FormField::End => Some(&mut self.end_input),
            FormField::Direction | FormField::Types | FormField::DateFilter => None,
        }
    }

    pub(crate) fn export_plan(&self) -> Result<ExportPlan, String> {
        let establishment = self
            .selected_establishment
            .clone()
            .ok_or_else(|| "Select an establishment first".to_owned())?;

        let start = parse_input_date(&self.start_input, "start")?;
        let end = parse_input_date(&self.end_input, "end")?;
        let range = DateRange::new(start, end).map_err(|err| err.to_string())?;

        let types = if self.all_types_selected() {
            None
        } else {
            let chosen: BTreeSet<String> = BSD_TYPES
                .iter()
                .zip(self.selected_types)
                .filter(|(_, selected)| *selected)
                .map(|(bsd_type, _)| (*bsd_type).to_owned())
                .collect();
            if chosen.is_empty() {
                return Err("Select at least one record type".to_owned());
            }
            Some(chosen)
        };

        Ok(ExportPlan {
            establishment,
            directions: self.directions,
            range,
            filters: ExportFilters {
                types,
                dates: self.date_filter.then_some(range),
            },
        })
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn parse_input_date(input: &str, which: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(input.trim(), INPUT_DATE)
        .map_err(|_err| format!("Invalid {which} date {input:?}, expected YYYY-MM-DD"))
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use registre_core::{
        cache::ExportKey,
        model::{
            EstablishmentInfo, EstablishmentSearchHit, ExportFormat, ExportId, ExportStatus,
            RegistryExportJob, Siret,
        },
        ports::{ApiError, RegistryApi},
    };

    use super::*;

    struct UnreachableApi;

    #[async_trait]
    impl RegistryApi for UnreachableApi {
        async fn list_accessible_establishments(
            &self,
        ) -> Result<Vec<EstablishmentAccess>, ApiError> {
            Ok(Vec::new())
        }

        async fn lookup_establishment(
            &self,
            _siret: &Siret,
        ) -> Result<Option<EstablishmentInfo>, ApiError> {
            Ok(None)
        }

        async fn search_establishment(
            &self,
            _siret: &Siret,
        ) -> Result<Option<EstablishmentSearchHit>, ApiError> {
            Ok(None)
        }

        async fn generate_registry_export(
            &self,
            _direction: RegistryDirection,
            _siret: &Siret,
            _range_start: &str,
            _range_end: &str,
            _format: ExportFormat,
        ) -> Result<RegistryExportJob, ApiError> {
            Err(ApiError::Decode {
                message: "not used".to_owned(),
            })
        }

        async fn export_status(&self, _export_id: &ExportId) -> Result<ExportStatus, ApiError> {
            Ok(ExportStatus::Pending)
        }

        async fn download_url(&self, _export_id: &ExportId) -> Result<String, ApiError> {
            Ok(String::new())
        }

        async fn download_bytes(&self, _url: &str) -> Result<Vec<u8>, ApiError> {
            Ok(Vec::new())
        }
    }

    fn establishment(name: &str, siret: &str) -> EstablishmentAccess {
        EstablishmentAccess {
            name: name.to_owned(),
            siret: Siret::parse(siret).expect("valid siret"),
        }
    }

    fn app() -> App {
        let service = Arc::new(ExportService::new(Arc::new(UnreachableApi)));
        let mut app = App::new(service, PathBuf::from("out"));
        app.establishments = vec![
            establishment("Alpha", "11111111111111"),
            establishment("Beta", "22222222222222"),
        ];
        app.select_current_establishment();
        app.start_input = "2024-01-01".to_owned();
        app.end_input = "2024-01-31".to_owned();
        app
    }

    #[test]
    fn form_focus_wraps_around() {
        assert_eq!(
            FormField::DateFilter.next(),
            FormField::Direction,
            "last field wraps to first"
        );
        assert_eq!(
            FormField::Direction.previous(),
            FormField::DateFilter,
            "first field wraps to last"
        );
        assert_eq!(FormField::Start.next(), FormField::End, "fields follow form order");
    }

    #[test]
    fn direction_choice_cycles_through_both() {
        let start = DirectionChoice::Single(RegistryDirection::Outgoing);
        assert_eq!(start.cycle().cycle().cycle(), start, "three steps return to start");
        assert_eq!(
            start.cycle().cycle(),
            DirectionChoice::Both,
            "both directions after incoming"
        );
    }

    #[test]
    fn all_types_selected_means_no_type_filter() {
        let plan = app().export_plan().expect("valid form");
        assert_eq!(plan.filters.types, None, "no type filter");
        assert_eq!(plan.filters.dates, None, "no date filter");
        assert!(!plan.filters.is_active(), "nothing to filter");
    }

    #[test]
    fn partial_type_selection_and_date_filter_are_carried() {
        let mut app = app();
        app.toggle_all_types();
        app.type_index = 1;
        app.toggle_current_type();
        app.date_filter = true;

        let plan = app.export_plan().expect("valid form");
        let types = plan.filters.types.expect("type filter");
        assert_eq!(
            types.into_iter().collect::<Vec<_>>(),
            vec!["BSDA".to_owned()],
            "only the toggled type kept"
        );
        assert_eq!(plan.filters.dates, Some(plan.range), "date filter uses the form range");
    }

    #[test]
    fn empty_type_selection_is_rejected() {
        let mut app = app();
        app.toggle_all_types();
        assert!(app.export_plan().is_err(), "at least one type required");
    }

    #[test]
    fn inverted_or_malformed_dates_are_rejected() {
        let mut app = app();
        app.start_input = "2024-02-01".to_owned();
        assert!(app.export_plan().is_err(), "start after end rejected");
        app.start_input = "01/01/2024".to_owned();
        assert!(app.export_plan().is_err(), "non-ISO date rejected");
    }

    #[test]
    fn changing_establishment_clears_the_cache() {
        let mut app = app();
        app.cache.record(
            ExportKey::new(
                Siret::parse("11111111111111").expect("valid siret"),
                RegistryDirection::Incoming,
                &DateRange::full_history(NaiveDate::from_ymd_opt(2024, 1, 1).expect("date")),
            ),
            ExportId("job".to_owned()),
        );

        app.establishment_index = 0;
        app.select_current_establishment();
        assert_eq!(app.cache.len(), 1, "same establishment keeps the cache");

        app.establishment_index = 1;
        app.select_current_establishment();
        assert!(app.cache.is_empty(), "new establishment clears the cache");
    }

    #[test]
    fn full_history_resets_filters() {
        let mut app = app();
        app.toggle_all_types();
        app.date_filter = true;
        app.use_full_history();
        assert_eq!(app.start_input, "2000-01-01", "full history starts in 2000");
        assert!(app.all_types_selected(), "every type selected");
        assert!(!app.date_filter, "date filter off");
    }
}
