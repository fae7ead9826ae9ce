//! Normalización de texto antes de trocear o de calcular claves.

/// Canoniza saltos de línea y espacios.
///
/// - `\r\n` y `\r` pasan a `\n`.
/// - Rachas de 2+ espacios horizontales se reducen a uno.
/// - Se eliminan espacios al final de cada línea.
/// - 3+ saltos seguidos quedan en una única línea en blanco.
/// - Se recorta el texto completo.
///
/// Es idempotente.
pub fn normalize(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");

    let mut lines: Vec<String> = Vec::new();
    for line in unified.split('\n') {
        lines.push(collapse_horizontal(line).trim_end().to_string());
    }

    let mut out = String::with_capacity(unified.len());
    let mut newline_run = 0usize;
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            newline_run += 1;
        }
        if line.is_empty() {
            continue;
        }
        if !out.is_empty() {
            let breaks = newline_run.min(2);
            for _ in 0..breaks {
                out.push('\n');
            }
        }
        newline_run = 0;
        out.push_str(line);
    }

    out.trim().to_string()
}

fn collapse_horizontal(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut run: Vec<char> = Vec::new();
    for c in line.chars() {
        if c.is_whitespace() {
            run.push(c);
            continue;
        }
        flush_run(&mut out, &mut run);
        out.push(c);
    }
    flush_run(&mut out, &mut run);
    out
}

fn flush_run(out: &mut String, run: &mut Vec<char>) {
    match run.len() {
        0 => {}
        1 => out.push(run[0]),
        _ => out.push(' '),
    }
    run.clear();
}

/// Clave de comparación para deduplicar preguntas: minúsculas, sin acentos,
/// espacios colapsados y recortada.
pub fn fold_key(text: &str) -> String {
    let mut folded = String::with_capacity(text.len());
    for c in text.chars().flat_map(char::to_lowercase) {
        if is_combining_mark(c) {
            continue;
        }
        match strip_accent(c) {
            Some(base) => folded.push_str(base),
            None => folded.push(c),
        }
    }
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_combining_mark(c: char) -> bool {
    ('\u{0300}'..='\u{036f}').contains(&c)
}

fn strip_accent(c: char) -> Option<&'static str> {
    let base = match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => "a",
        'ç' | 'ć' | 'č' | 'ĉ' => "c",
        'ď' | 'đ' => "d",
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ė' | 'ę' | 'ě' => "e",
        'ğ' | 'ģ' => "g",
        'ì' | 'í' | 'î' | 'ï' | 'ī' | 'į' | 'ı' => "i",
        'ł' | 'ľ' | 'ĺ' => "l",
        'ñ' | 'ń' | 'ň' | 'ņ' => "n",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ő' => "o",
        'ř' | 'ŕ' => "r",
        'ś' | 'š' | 'ş' | 'ș' => "s",
        'ť' | 'ţ' | 'ț' => "t",
        'ù' | 'ú' | 'û' | 'ü' | 'ū' | 'ů' | 'ű' | 'ų' => "u",
        'ý' | 'ÿ' => "y",
        'ź' | 'ż' | 'ž' => "z",
        'æ' => "ae",
        'œ' => "oe",
        'ß' => "ss",
        _ => return None,
    };
    Some(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_endings_and_spaces() {
        let raw = "Hola   mundo  \r\nsegunda\tlínea\t\t\rtercera";
        assert_eq!(normalize(raw), "Hola mundo\nsegunda\tlínea\ntercera");
    }

    #[test]
    fn test_blank_line_runs_collapse_to_one() {
        let raw = "uno\n\n\n\n\ndos\n\ntres\n \n\t\n\ncuatro";
        assert_eq!(normalize(raw), "uno\n\ndos\n\ntres\n\ncuatro");
    }

    #[test]
    fn test_trims_whole_text() {
        assert_eq!(normalize("\n\n   texto   \n\n"), "texto");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize(" \r\n\t "), "");
    }

    #[test]
    fn test_idempotent() {
        let samples = [
            "",
            "a",
            "  a  b \r\n\r\n\r\n c\t\td  ",
            "x\r\r\ry\n \n \n z",
            "\u{a0}\u{a0}nbsp\u{a0} \n\n\n\n fin ",
            "línea con acentos   \r\notra\n\n\n\n\n\n",
            "\t lead\n\t\ttab",
        ];
        for s in samples {
            let once = normalize(s);
            assert_eq!(normalize(&once), once, "no idempotente para {s:?}");
        }
    }

    #[test]
    fn test_fold_key_ignores_case_and_accents() {
        assert_eq!(fold_key("  ¿Cuál es el HORARIO?  "), "¿cual es el horario?");
        assert_eq!(fold_key("cual es el horario?"), "cual es el horario?");
        assert_eq!(fold_key("Cafe\u{301}  con\nleche"), "cafe con leche");
        assert_eq!(fold_key("Straße"), "strasse");
    }
}
