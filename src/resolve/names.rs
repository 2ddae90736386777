use itertools::Itertools;

fn fold_char(c: char) -> Option<&'static str> {
    let folded = match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => "a",
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' => "a",
        'è' | 'é' | 'ê' | 'ë' | 'È' | 'É' | 'Ê' | 'Ë' => "e",
        'ì' | 'í' | 'î' | 'ï' | 'Ì' | 'Í' | 'Î' | 'Ï' => "i",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' => "o",
        'ù' | 'ú' | 'û' | 'ü' | 'Ù' | 'Ú' | 'Û' | 'Ü' => "u",
        'ç' | 'Ç' => "c",
        'ñ' | 'Ñ' => "n",
        'ß' => "ss",
        _ => return None,
    };
    Some(folded)
}

/// Lower-cases, folds accents and turns punctuation into single spaces.
///
/// `"  D'Angelo-Rossi, Nicolò "` becomes `"d angelo rossi nicolo"`.
pub fn normalize_name(raw: &str) -> String {
    let mut folded = String::with_capacity(raw.len());
    for c in raw.chars() {
        match fold_char(c) {
            Some(replacement) => folded.push_str(replacement),
            None if c.is_alphanumeric() => folded.extend(c.to_lowercase()),
            None => folded.push(' '),
        }
    }
    folded.split_whitespace().join(" ")
}

pub fn name_tokens(raw: &str) -> Vec<String> {
    normalize_name(raw)
        .split(' ')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// `input` equals `first last` or `last first` after normalisation.
pub fn exact_name_match(input: &str, first: &str, last: &str) -> bool {
    let input = normalize_name(input);
    if input.is_empty() {
        return false;
    }
    let first = normalize_name(first);
    let last = normalize_name(last);
    input == format!("{first} {last}").trim() || input == format!("{last} {first}").trim()
}

/// Token containment match.
///
/// Matches when every token of the person's first and last name occurs in
/// the input, or when the input tokens are a subset of the person's tokens
/// and cover at least one first-name and one last-name token.
pub fn fuzzy_name_match(input: &str, first: &str, last: &str) -> bool {
    let input = name_tokens(input);
    let first = name_tokens(first);
    let last = name_tokens(last);
    if input.is_empty() || first.is_empty() || last.is_empty() {
        return false;
    }
    let contains_all = first.iter().chain(&last).all(|t| input.contains(t));
    if contains_all {
        return true;
    }
    let subset = input.iter().all(|t| first.contains(t) || last.contains(t));
    subset && input.iter().any(|t| first.contains(t)) && input.iter().any(|t| last.contains(t))
}
