//! Default values shared between CLI parsing and validation.

pub const DEFAULT_LANGUAGE: &str = "en";
pub const DEFAULT_PROJECT: &str = "default";
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;
pub const DEFAULT_MIC_CHECK_MS: u64 = 2_000;
pub const MIN_MIC_CHECK_MS: u64 = 500;
pub const MAX_MIC_CHECK_MS: u64 = 30_000;

pub(super) const MIN_CHANNEL_CAPACITY: usize = 8;
pub(super) const MAX_CHANNEL_CAPACITY: usize = 1024;
pub(super) const MAX_PROJECT_CHARS: usize = 64;
pub(super) const MAX_DEVICE_NAME_CHARS: usize = 256;

/// Two-letter primary codes accepted for `--language`.
pub(super) const ISO_639_1_CODES: &[&str] = &[
    "aa", "ab", "ae", "af", "ak", "am", "an", "ar", "as", "av", "ay", "az", "ba", "be", "bg", "bh",
    "bi", "bm", "bn", "bo", "br", "bs", "ca", "ce", "ch", "co", "cr", "cs", "cu", "cv", "cy", "da",
    "de", "dv", "dz", "ee", "el", "en", "eo", "es", "et", "eu", "fa", "ff", "fi", "fj", "fo", "fr",
    "fy", "ga", "gd", "gl", "gn", "gu", "gv", "ha", "he", "hi", "ho", "hr", "ht", "hu", "hy", "hz",
    "ia", "id", "ie", "ig", "ii", "ik", "io", "is", "it", "iu", "ja", "jv", "ka", "kg", "ki", "kj",
    "kk", "kl", "km", "kn", "ko", "kr", "ks", "ku", "kv", "kw", "ky", "la", "lb", "lg", "li", "ln",
    "lo", "lt", "lu", "lv", "mg", "mh", "mi", "mk", "ml", "mn", "mr", "ms", "mt", "my", "na", "nb",
    "nd", "ne", "ng", "nl", "nn", "no", "nr", "nv", "ny", "oc", "oj", "om", "or", "os", "pa", "pi",
    "pl", "ps", "pt", "qu", "rm", "rn", "ro", "ru", "rw", "sa", "sc", "sd", "se", "sg", "si", "sk",
    "sl", "sm", "sn", "so", "sq", "sr", "ss", "st", "su", "sv", "sw", "ta", "te", "tg", "th", "ti",
    "tk", "tl", "tn", "to", "tr", "ts", "tt", "tw", "ty", "ug", "uk", "ur", "uz", "ve", "vi", "vo",
    "wa", "wo", "xh", "yi", "yo", "za", "zh", "zu",
];
