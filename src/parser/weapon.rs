const BLUEPRINT_PREFIX: &str = "BP_";
const CLASS_SUFFIX: &str = "_C";
const CATEGORY_PREFIXES: [&str; 4] = ["Firearm_", "Weapon_", "Melee_", "Projectile_"];
const MULTI_VARIANT_NAMES: [&str; 2] = ["Objective Checkpoint", "Objective WeaponCache"];
const UNKNOWN_WEAPON_NAME: &str = "Unknown";

/// Turns a raw damage-causer token into a stable display name.
///
/// `BP_Firearm_AKM_C_2147480001` and `BP_Firearm_AKM_C_2147480002` both
/// become `AKM`: the trailing instance id is the only part that varies.
pub fn normalize_weapon_name(raw_token: &str) -> String {
    let mut name = raw_token.trim();
    name = name.strip_prefix(BLUEPRINT_PREFIX).unwrap_or(name);
    name = strip_instance_id(name);
    name = name.strip_suffix(CLASS_SUFFIX).unwrap_or(name);

    if let Some(without_category) = CATEGORY_PREFIXES
        .iter()
        .find_map(|prefix| name.strip_prefix(prefix))
    {
        name = without_category;
    }

    let spaced = name.replace('_', " ");
    let spaced = spaced.trim();
    if spaced.is_empty() {
        return UNKNOWN_WEAPON_NAME.to_string();
    }

    collapse_variant_suffix(spaced)
}

fn strip_instance_id(name: &str) -> &str {
    match name.rsplit_once('_') {
        Some((base, suffix))
            if !base.is_empty()
                && !suffix.is_empty()
                && suffix.bytes().all(|byte| byte.is_ascii_digit()) =>
        {
            base
        }
        _ => name,
    }
}

fn collapse_variant_suffix(name: &str) -> String {
    for canonical_name in MULTI_VARIANT_NAMES {
        let Some(suffix) = name.strip_prefix(canonical_name) else {
            continue;
        };

        let letter = suffix.strip_prefix(' ').unwrap_or(suffix);
        if letter.len() == 1 && letter.bytes().all(|byte| byte.is_ascii_alphabetic()) {
            return canonical_name.to_string();
        }
    }

    name.to_string()
}
