//! Purpose: Rendering-agnostic controller for listing and editing cards.
//! Exports: `RecordView`, `Renderer`, `CardForm`, `EditMode`.
//! Role: Drives a `RecordsApi` and reports every outcome through a `Renderer`.
//! Invariants: At most one request is in flight per view; overlapping actions fail with `Busy`.
//! Invariants: Successful submit and delete are always followed by a full refresh.
//! Invariants: A failed submit leaves the form contents untouched.
#![allow(clippy::result_large_err)]

use std::sync::{Mutex, MutexGuard};

use crate::api::{Card, CardFields, RecordsApi};
use crate::core::error::{Error, ErrorKind};

/// Output side of the view.
///
/// Methods take `&mut self`; the view serializes access, so implementations do
/// not need interior locking.
pub trait Renderer {
    /// Replaces whatever list is shown with `cards`.
    fn render_list(&mut self, cards: &[Card]);
    /// Shown in place of the list when it could not be loaded.
    fn render_diagnostic(&mut self, err: &Error);
    fn notify(&mut self, message: &str);
    fn fill_form(&mut self, form: &CardForm);
    fn reset_form(&mut self);
    fn scroll_to_form(&mut self) {}
    fn confirm(&mut self, prompt: &str) -> bool;
    fn set_submit_enabled(&mut self, _enabled: bool) {}
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum EditMode {
    #[default]
    Creating,
    Editing {
        id: String,
    },
}

/// Form contents exactly as typed.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CardForm {
    pub name: String,
    pub elixir_cost: String,
    pub rarity: String,
    pub card_type: String,
    pub image_url: String,
    pub evolution_image_url: String,
    pub extra_image_url: String,
}

impl CardForm {
    pub fn from_card(card: &Card) -> Self {
        let fields = &card.fields;
        let text = |value: &Option<String>| value.clone().unwrap_or_default();
        Self {
            name: fields.name.clone(),
            elixir_cost: fields.elixir_cost.to_string(),
            rarity: text(&fields.rarity),
            card_type: text(&fields.card_type),
            image_url: text(&fields.image_url),
            evolution_image_url: text(&fields.evolution_image_url),
            extra_image_url: text(&fields.extra_image_url),
        }
    }

    /// Parses the form into submittable fields without contacting the gateway.
    pub fn to_fields(&self) -> Result<CardFields, Error> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(Error::new(ErrorKind::Invalid).with_message("name is required"));
        }
        let elixir_cost = self
            .elixir_cost
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|cost| *cost > 0)
            .ok_or_else(|| {
                Error::new(ErrorKind::Invalid)
                    .with_message("elixir cost must be a positive whole number")
            })?;
        let optional = |value: &str| {
            let value = value.trim();
            (!value.is_empty()).then(|| value.to_string())
        };
        let fields = CardFields {
            name: name.to_string(),
            elixir_cost,
            rarity: optional(&self.rarity),
            card_type: optional(&self.card_type),
            image_url: optional(&self.image_url),
            evolution_image_url: optional(&self.evolution_image_url),
            extra_image_url: optional(&self.extra_image_url),
        };
        fields.validate()?;
        Ok(fields)
    }
}

#[derive(Debug, Default)]
struct ViewState {
    mode: EditMode,
    form: CardForm,
    in_flight: bool,
}

pub struct RecordView<A, R> {
    api: A,
    renderer: Mutex<R>,
    state: Mutex<ViewState>,
}

/// Clears the in-flight flag and re-enables submit when dropped.
struct InFlight<'a, A, R: Renderer> {
    view: &'a RecordView<A, R>,
}

impl<A, R: Renderer> Drop for InFlight<'_, A, R> {
    fn drop(&mut self) {
        self.view.state().in_flight = false;
        self.view.renderer().set_submit_enabled(true);
    }
}

impl<A: RecordsApi, R: Renderer> RecordView<A, R> {
    pub fn new(api: A, renderer: R) -> Self {
        Self {
            api,
            renderer: Mutex::new(renderer),
            state: Mutex::new(ViewState::default()),
        }
    }

    pub fn mode(&self) -> EditMode {
        self.state().mode.clone()
    }

    pub fn form(&self) -> CardForm {
        self.state().form.clone()
    }

    pub fn set_form(&self, form: CardForm) {
        self.state().form = form;
    }

    pub fn is_busy(&self) -> bool {
        self.state().in_flight
    }

    /// Runs `f` against the renderer, e.g. to inspect what it recorded.
    pub fn with_renderer<T>(&self, f: impl FnOnce(&mut R) -> T) -> T {
        f(&mut self.renderer())
    }

    pub fn into_parts(self) -> (A, R) {
        let renderer = self
            .renderer
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        (self.api, renderer)
    }

    /// Loads every card and renders the list; returns how many were shown.
    pub fn refresh(&self) -> Result<usize, Error> {
        match self.api.list() {
            Ok(cards) => {
                self.renderer().render_list(&cards);
                Ok(cards.len())
            }
            Err(err) => {
                self.renderer().render_diagnostic(&err);
                Err(err)
            }
        }
    }

    /// Creates or updates depending on the mode; returns the affected id.
    pub fn submit(&self) -> Result<String, Error> {
        let _guard = self.begin_request()?;
        let (mode, form) = {
            let state = self.state();
            (state.mode.clone(), state.form.clone())
        };

        let result = form.to_fields().and_then(|fields| match &mode {
            EditMode::Creating => self.api.create(&fields),
            EditMode::Editing { id } => self.api.update(id, &fields),
        });
        let id = match result {
            Ok(id) => id,
            Err(err) => {
                self.report(&err);
                return Err(err);
            }
        };

        self.reset();
        let _ = self.refresh();
        Ok(id)
    }

    /// Loads one card into the form and switches to edit mode.
    pub fn begin_edit(&self, id: &str) -> Result<(), Error> {
        let _guard = self.begin_request()?;
        let card = match self.api.get(id) {
            Ok(card) => card,
            Err(err) => {
                self.report(&err);
                return Err(err);
            }
        };
        let form = CardForm::from_card(&card);
        {
            let mut state = self.state();
            state.mode = EditMode::Editing {
                id: card.id.clone(),
            };
            state.form = form.clone();
        }
        let mut renderer = self.renderer();
        renderer.fill_form(&form);
        renderer.scroll_to_form();
        Ok(())
    }

    /// Deletes after confirmation; `Ok(false)` means the user declined.
    pub fn delete(&self, id: &str) -> Result<bool, Error> {
        let _guard = self.begin_request()?;
        let confirmed = self
            .renderer()
            .confirm(&format!("Delete card {id}?"));
        if !confirmed {
            return Ok(false);
        }
        if let Err(err) = self.api.delete(id) {
            self.report(&err);
            return Err(err);
        }

        let editing_deleted = matches!(&self.state().mode, EditMode::Editing { id: editing } if editing == id);
        if editing_deleted {
            self.reset();
        }
        let _ = self.refresh();
        Ok(true)
    }

    fn begin_request(&self) -> Result<InFlight<'_, A, R>, Error> {
        {
            let mut state = self.state();
            if state.in_flight {
                drop(state);
                let err = Error::new(ErrorKind::Busy)
                    .with_message("another request is still in progress");
                self.report(&err);
                return Err(err);
            }
            state.in_flight = true;
        }
        self.renderer().set_submit_enabled(false);
        Ok(InFlight { view: self })
    }

    fn reset(&self) {
        {
            let mut state = self.state();
            state.mode = EditMode::Creating;
            state.form = CardForm::default();
        }
        self.renderer().reset_form();
    }

    fn report(&self, err: &Error) {
        self.renderer().notify(&user_message(err));
    }
}

impl<A, R> RecordView<A, R> {
    fn state(&self) -> MutexGuard<'_, ViewState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn renderer(&self) -> MutexGuard<'_, R> {
        self.renderer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Text suitable for showing to the person using the view.
pub fn user_message(err: &Error) -> String {
    let detail = err.message().unwrap_or("unknown error");
    match err.kind() {
        ErrorKind::Invalid => format!("Invalid card: {detail}"),
        ErrorKind::NotFound => match err.id() {
            Some(id) => format!("Card {id} no longer exists"),
            None => "That card no longer exists".to_string(),
        },
        ErrorKind::Conflict => {
            "The card was changed elsewhere; reload it and try again".to_string()
        }
        ErrorKind::Unavailable => "The card service is unavailable; try again later".to_string(),
        ErrorKind::Busy => "Please wait for the current request to finish".to_string(),
        _ => format!("Something went wrong: {detail}"),
    }
}
