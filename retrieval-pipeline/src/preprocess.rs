//! Query preprocessing for the lexical leg of hybrid search and the
//! adaptive fusion weight.

/// Version tag of the curated stopword list. Bump on any edit; retrieval
/// behaviour depends on it.
pub const STOPWORDS_VERSION: u32 = 1;

/// Curated French stopwords stripped from lexical queries. Tokens kept by
/// the acronym/proper-noun rules bypass this list entirely.
pub const FRENCH_STOPWORDS: &[&str] = &[
    "a", "à", "afin", "ah", "ai", "ainsi", "alors", "au", "aucun", "aucune", "aujourd",
    "auquel", "aussi", "autre", "autres", "aux", "avant", "avec", "avoir", "bien", "car",
    "ce", "ceci", "cela", "celle", "celles", "celui", "cependant", "certain", "certaine",
    "certains", "ces", "cet", "cette", "ceux", "chaque", "ci", "comme", "comment", "d",
    "dans", "de", "dedans", "dehors", "depuis", "des", "deux", "devrait", "doit", "donc",
    "dont", "du", "elle", "elles", "en", "encore", "enfin", "entre", "environ", "est",
    "et", "etc", "être", "eu", "fait", "faites", "fois", "font", "hors", "ici", "il",
    "ils", "je", "juste", "l", "la", "là", "laquelle", "le", "lequel", "les",
    "lesquelles", "lesquels", "leur", "leurs", "lors", "lui", "ma", "maintenant", "mais",
    "me", "même", "mes", "moi", "moins", "mon", "ne", "ni", "non", "nos", "notre",
    "nous", "on", "ont", "ou", "où", "par", "parce", "pas", "peu", "peut", "plus",
    "pour", "pourquoi", "quand", "que", "quel", "quelle", "quelles", "quels", "qui",
    "quoi", "sa", "sans", "se", "selon", "ses", "seulement", "si", "son", "sont",
    "sous", "sur", "ta", "tes", "toi", "ton", "tous", "tout", "toute", "toutes", "très",
    "trop", "tu", "un", "une", "vers", "vos", "votre", "vous", "y", "ça", "été",
];

/// Markers of a question that leans on semantics rather than keywords.
const SEMANTIC_MARKERS: &[&str] = &["pourquoi", "comment", "expliquer", "signifie"];

/// Splits on every non-alphanumeric character, so "est-ce" and "l'erreur"
/// decompose into their stopword parts.
fn tokenize(query: &str) -> Vec<&str> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .collect()
}

/// An acronym keeps its lexical weight: at least two letters, all of them
/// uppercase.
pub fn is_acronym(token: &str) -> bool {
    let letters: Vec<char> = token.chars().filter(|c| c.is_alphabetic()).collect();
    letters.len() >= 2 && letters.iter().all(|c| c.is_uppercase())
}

fn starts_uppercase(token: &str) -> bool {
    token.chars().next().is_some_and(char::is_uppercase)
}

fn is_stopword(token: &str) -> bool {
    let lowered = token.to_lowercase();
    FRENCH_STOPWORDS.contains(&lowered.as_str())
}

/// Builds the AND-joined `to_tsquery('french', ...)` input for a user query.
/// Returns `None` when nothing but stopwords survives, which callers treat
/// as "fall back to pure vector search".
pub fn build_lexical_query(query: &str) -> Option<String> {
    let mut terms = Vec::new();

    for (position, token) in tokenize(query).into_iter().enumerate() {
        let preserved = is_acronym(token) || (position > 0 && starts_uppercase(token));
        if !preserved && is_stopword(token) {
            continue;
        }

        terms.push(token.to_lowercase());
    }

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" & "))
    }
}

/// Fusion weight given to the vector-ranked list; `1 - alpha` goes to the
/// lexical list.
pub fn adaptive_alpha(query: &str) -> f32 {
    let tokens = tokenize(query);

    // Keyword-heavy signals first: acronyms and proper nouns are where the
    // lexical index shines.
    if tokens.iter().any(|token| is_acronym(token)) {
        return 0.3;
    }
    if tokens
        .iter()
        .skip(1)
        .any(|token| starts_uppercase(token) && !is_acronym(token))
    {
        return 0.3;
    }

    let lowered = query.to_lowercase();
    if SEMANTIC_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        return 0.7;
    }

    if tokens.len() <= 4 {
        return 0.4;
    }

    0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acronym_detection() {
        assert!(is_acronym("RTT"));
        assert!(is_acronym("CP"));
        assert!(is_acronym("SIRH2")); // digits don't disqualify
        assert!(!is_acronym("Paris"));
        assert!(!is_acronym("rtt"));
        assert!(!is_acronym("A"));
    }

    #[test]
    fn test_lexical_query_removes_stopwords() {
        let terms = build_lexical_query("quelle est la politique de télétravail").unwrap();
        assert_eq!(terms, "politique & télétravail");
    }

    #[test]
    fn test_lexical_query_preserves_acronyms() {
        let terms = build_lexical_query("la procédure RTT").unwrap();
        assert_eq!(terms, "procédure & rtt");
    }

    #[test]
    fn test_lexical_query_preserves_proper_nouns_after_first_position() {
        // "Le" leads the sentence so it is not treated as a proper noun and
        // falls to the stopword list; "Grenoble" survives.
        let terms = build_lexical_query("Le site de Grenoble").unwrap();
        assert_eq!(terms, "site & grenoble");
    }

    #[test]
    fn test_lexical_query_strips_punctuation() {
        let terms = build_lexical_query("erreur 6102, fusappel !").unwrap();
        assert_eq!(terms, "erreur & 6102 & fusappel");
    }

    #[test]
    fn test_stopword_only_query_yields_none() {
        assert_eq!(build_lexical_query("est-ce que la"), None);
        assert_eq!(build_lexical_query(""), None);
        assert_eq!(build_lexical_query("?!"), None);
    }

    #[test]
    fn test_alpha_acronym_bias() {
        assert!((adaptive_alpha("procédure RTT") - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn test_alpha_proper_noun_bias() {
        assert!((adaptive_alpha("les horaires du site de Grenoble") - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn test_alpha_semantic_bias() {
        assert!((adaptive_alpha("pourquoi le serveur redémarre tous les soirs") - 0.7).abs()
            < f32::EPSILON);
        assert!((adaptive_alpha("que signifie ce code de retour exactement") - 0.7).abs()
            < f32::EPSILON);
    }

    #[test]
    fn test_alpha_short_query() {
        assert!((adaptive_alpha("congés paternité") - 0.4).abs() < f32::EPSILON);
    }

    #[test]
    fn test_alpha_default() {
        let alpha = adaptive_alpha("les étapes pour déclarer un incident sur le portail interne");
        assert!((alpha - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_acronym_wins_over_semantic_marker() {
        // Rules apply in order; the acronym check comes first.
        assert!((adaptive_alpha("comment poser un RTT") - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn test_stopword_list_is_reasonably_sized() {
        assert!(FRENCH_STOPWORDS.len() >= 120);
        assert_eq!(STOPWORDS_VERSION, 1);
    }
}
