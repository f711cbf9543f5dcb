//! Picker contents derived from the cached model directory.

use crate::settings::types::{ModelDescriptor, ModelOption, ModelPreferences, ModelRole};

/// Models eligible for `role`, plus a disabled entry for the stored choice
/// when the directory no longer lists it.
///
/// Document and vision roles only offer vision-capable models. The chat role
/// offers everything, text-only models first. Ordering within each group
/// follows the directory.
pub fn models_for_role(
    available: &[ModelDescriptor],
    preferences: &ModelPreferences,
    role: ModelRole,
) -> Vec<ModelOption> {
    let mut options: Vec<ModelOption> = if role.requires_vision() {
        available
            .iter()
            .filter(|model| model.supports_vision)
            .map(ModelOption::from)
            .collect()
    } else {
        let (text, vision): (Vec<_>, Vec<_>) =
            available.iter().partition(|model| !model.supports_vision);
        text.into_iter()
            .chain(vision)
            .map(ModelOption::from)
            .collect()
    };

    let selected = preferences.model_for(role);
    if !selected.is_empty() && !options.iter().any(|option| option.name == selected) {
        options.push(ModelOption::unavailable(selected));
    }
    options
}

/// First eligible model for `role`, used to fill an empty preference.
pub fn default_model_for_role(available: &[ModelDescriptor], role: ModelRole) -> Option<&str> {
    let model = if role.requires_vision() {
        available.iter().find(|model| model.supports_vision)
    } else {
        available
            .iter()
            .find(|model| !model.supports_vision)
            .or_else(|| available.first())
    };
    model.map(|m| m.name.as_str())
}
