//! Deterministic object-store key generators (spec §4.8). Bit-exact —
//! manifest readers depend on reproducing these strings across processes
//! and operating systems (§8 "Key determinism").

pub fn original_key(sku: &str, sha256: &str) -> String {
    format!("originals/{sku}/{sha256}.jpg")
}

pub fn cutout_key(sku: &str, sha256: &str) -> String {
    format!("cutouts/{sku}/{sha256}.png")
}

pub fn mask_key(sku: &str, sha256: &str) -> String {
    format!("masks/{sku}/{sha256}.png")
}

pub fn background_key(theme: &str, sku: &str, sha256: &str, variant: usize) -> String {
    format!("backgrounds/{theme}/{sku}/{sha256}_{variant}.jpg")
}

pub fn composite_key(
    theme: &str,
    sku: &str,
    sha256: &str,
    aspect: &str,
    variant: usize,
    kind: &str,
    ext: &str,
) -> String {
    format!("composites/{theme}/{sku}/{sha256}_{aspect}_{variant}_{kind}.{ext}")
}

pub fn derivative_key(
    theme: &str,
    sku: &str,
    sha256: &str,
    variant: usize,
    size: &str,
    ext: &str,
) -> String {
    format!("derivatives/{theme}/{sku}/{sha256}/{variant}_{size}.{ext}")
}

pub fn manifest_key(sku: &str, sha256: &str, theme: &str) -> String {
    format!("manifests/{sku}/{sha256}-{theme}.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_stable_and_bit_exact() {
        assert_eq!(original_key("SKU-1", "aa"), "originals/SKU-1/aa.jpg");
        assert_eq!(cutout_key("SKU-1", "aa"), "cutouts/SKU-1/aa.png");
        assert_eq!(mask_key("SKU-1", "aa"), "masks/SKU-1/aa.png");
        assert_eq!(
            background_key("default", "SKU-1", "aa", 0),
            "backgrounds/default/SKU-1/aa_0.jpg"
        );
        assert_eq!(
            composite_key("default", "SKU-1", "aa", "1x1", 0, "master", "jpg"),
            "composites/default/SKU-1/aa_1x1_0_master.jpg"
        );
        assert_eq!(
            derivative_key("default", "SKU-1", "aa", 0, "hero", "webp"),
            "derivatives/default/SKU-1/aa/0_hero.webp"
        );
        assert_eq!(
            manifest_key("SKU-1", "aa", "default"),
            "manifests/SKU-1/aa-default.json"
        );
    }

    #[test]
    fn keys_are_deterministic_across_repeated_calls() {
        let a = composite_key("luxury", "SKU-2", "bb", "4x5", 1, "master", "webp");
        let b = composite_key("luxury", "SKU-2", "bb", "4x5", 1, "master", "webp");
        assert_eq!(a, b);
    }
}
