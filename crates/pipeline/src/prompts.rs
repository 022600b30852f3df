//! Stage prompts.
//!
//! Models only ever produce text inside a stage; which stage runs next is
//! decided by the pipeline, so none of these prompts mention hand-offs.

use agrag_core::passage::Passage;

/// Marker phrase of the insufficient-information answer.
pub const INSUFFICIENT_MARKER: &str = "No tengo esa información";

/// Heading of the citation section.
pub const SOURCES_HEADING: &str = "Fuentes:";

pub fn triage_system(persona: &str) -> String {
    format!(
        "{persona}\n\n\
         Clasifica el último mensaje del usuario:\n\
         - GENERAL: saludos, cortesía, conversación casual, agradecimientos.\n\
         - SPECIFIC: preguntas que necesitan información de la base de conocimiento.\n\n\
         Responde con UNA de estas dos formas y nada más:\n\
         GENERAL: <respuesta breve y amable, presentándote como asistente>\n\
         SPECIFIC\n\n\
         No inventes información."
    )
}

pub fn query_generation_system(count: usize) -> String {
    let noun = if count == 1 { "consulta" } else { "consultas diferentes" };
    format!(
        "Eres experto en formular consultas de búsqueda.\n\n\
         Genera EXACTAMENTE {count} {noun} que cubran ángulos complementarios \
         de la pregunta del usuario.\n\
         Devuelve SOLO un arreglo JSON de {count} strings, sin texto adicional.\n\n\
         Ejemplo:\n\
         [\"funcionalidades de la plataforma\", \"arquitectura del sistema\", \"casos de uso\"]"
    )
}

pub fn synthesis_system(persona: &str) -> String {
    format!(
        "{persona}\n\n\
         Responde la pregunta del usuario usando SOLO los fragmentos recuperados.\n\
         1) Lee todos los fragmentos, integra lo complementario y elimina redundancias.\n\
         2) No afirmes nada que no esté en los fragmentos.\n\
         3) Si los fragmentos se contradicen, dilo explícitamente.\n\
         4) Si la información es parcial, indícalo.\n\
         5) Usa entre 1 y 5 párrafos en Markdown.\n\
         No escribas una sección de fuentes; se agrega automáticamente."
    )
}

/// The user message of the synthesis call: the question plus numbered
/// passages tagged with their source.
pub fn synthesis_user(utterance: &str, passages: &[&Passage]) -> String {
    let mut out = format!("Pregunta: {utterance}\n\nFragmentos recuperados:\n");
    for (i, passage) in passages.iter().enumerate() {
        out.push_str(&format!(
            "\n[{}] (fuente: {})\n{}\n",
            i + 1,
            passage.source,
            passage.content.trim()
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_prompt_names_the_count() {
        assert!(query_generation_system(3).contains("EXACTAMENTE 3"));
        assert!(query_generation_system(1).contains("1 consulta"));
    }

    #[test]
    fn synthesis_user_numbers_passages() {
        let a = Passage::new("Contenido A", "a.md");
        let b = Passage::new("Contenido B", "https://b.example.com");
        let text = synthesis_user("¿qué es?", &[&a, &b]);
        assert!(text.contains("[1] (fuente: a.md)"));
        assert!(text.contains("[2] (fuente: https://b.example.com)\nContenido B"));
    }
}
