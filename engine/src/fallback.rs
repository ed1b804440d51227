//! Canned responses used when a backend cannot answer.
//!
//! The text is deterministic per prompt: the same prompt against the same
//! backend always produces the same fallback, so retries and tests see
//! stable output.

use relay_common::{BackendId, Fragment};
use sha2::{Digest, Sha256};

/// Language of a fallback response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    English,
    Indonesian,
}

const INDONESIAN_INDICATORS: &[&str] = &[
    "saya", "anda", "dengan", "untuk", "ini", "itu", "yang", "adalah", "dari", "di", "ke",
    "pada", "akan", "telah", "sudah", "dapat", "bagaimana", "mengapa", "kapan", "dimana",
    "apa", "siapa", "jelaskan", "tolong", "bantu", "terima kasih", "maaf", "bisakah",
    "dapatkah", "maukah", "bisa", "tidak", "ya",
];

const ENGLISH_INDICATORS: &[&str] = &[
    "the", "and", "for", "this", "that", "with", "from", "is", "are", "have", "has", "had",
    "can", "will", "would", "should", "could", "what", "where", "when", "why", "how", "who",
    "which", "please", "help", "thank", "thanks", "sorry", "yes", "no",
];

/// Guess whether a prompt is Indonesian or English. English wins ties.
pub fn detect_language(text: &str) -> Language {
    let lowered = text.to_lowercase();
    let tokens: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    let count = |indicators: &[&str]| {
        indicators
            .iter()
            .filter(|word| {
                let word: &str = word;
                if word.contains(' ') {
                    lowered.contains(word)
                } else {
                    tokens.contains(&word)
                }
            })
            .count()
    };

    if count(INDONESIAN_INDICATORS) > count(ENGLISH_INDICATORS) {
        Language::Indonesian
    } else {
        Language::English
    }
}

fn phrasings(backend: BackendId, language: Language) -> &'static [&'static str] {
    match (backend, language) {
        (BackendId::Coder, Language::English) => &[
            "The coding assistant is not available right now, so I can't review or write code for this request. Please try again in a little while.",
            "I can usually help with programming and debugging, but the code model is offline at the moment. Please resend your question shortly.",
            "Code generation is temporarily unavailable. Your request was received, but no code model could answer it.",
        ],
        (BackendId::Coder, Language::Indonesian) => &[
            "Asisten pemrograman sedang tidak tersedia, jadi saya belum bisa menulis atau memeriksa kode untuk permintaan ini. Silakan coba lagi nanti.",
            "Biasanya saya dapat membantu pemrograman dan debugging, tetapi model kode sedang offline. Silakan kirim ulang pertanyaan Anda sebentar lagi.",
            "Pembuatan kode untuk sementara tidak tersedia. Permintaan Anda sudah diterima, tetapi belum ada model kode yang dapat menjawabnya.",
        ],
        (BackendId::Documents, Language::English) => &[
            "I can help with document processing and file analysis, but the document model is not loaded right now. Please try again later.",
            "Document handling is temporarily unavailable. Your file request was received but could not be processed yet.",
            "The document assistant is offline at the moment. Please resend your request in a little while.",
        ],
        (BackendId::Documents, Language::Indonesian) => &[
            "Saya dapat membantu pemrosesan dokumen dan analisis file, tetapi model dokumen belum dimuat. Silakan coba lagi nanti.",
            "Penanganan dokumen untuk sementara tidak tersedia. Permintaan file Anda sudah diterima tetapi belum dapat diproses.",
            "Asisten dokumen sedang offline. Silakan kirim ulang permintaan Anda sebentar lagi.",
        ],
        (BackendId::Multimodal, Language::English) => &[
            "I can describe images and videos, but the multimodal model is not available right now. Please try again later.",
            "Image and video analysis is temporarily unavailable. Your request was received but could not be processed yet.",
            "The multimodal assistant is offline at the moment. Please resend your request in a little while.",
        ],
        (BackendId::Multimodal, Language::Indonesian) => &[
            "Saya dapat menjelaskan gambar dan video, tetapi model multimodal sedang tidak tersedia. Silakan coba lagi nanti.",
            "Analisis gambar dan video untuk sementara tidak tersedia. Permintaan Anda sudah diterima tetapi belum dapat diproses.",
            "Asisten multimodal sedang offline. Silakan kirim ulang permintaan Anda sebentar lagi.",
        ],
        (BackendId::General, Language::English) => &[
            "I'm here to help, but the assistant model is not available right now. Please try again in a moment.",
            "Thanks for your message! The assistant is temporarily offline, so I can't give a full answer yet.",
            "Your message was received, but no model could answer it right now. Please ask again shortly.",
        ],
        (BackendId::General, Language::Indonesian) => &[
            "Saya siap membantu, tetapi model asisten sedang tidak tersedia. Silakan coba lagi sebentar lagi.",
            "Terima kasih atas pesan Anda! Asisten sedang offline, jadi saya belum bisa memberikan jawaban lengkap.",
            "Pesan Anda sudah diterima, tetapi belum ada model yang dapat menjawabnya. Silakan tanyakan lagi nanti.",
        ],
    }
}

/// Stable variant index for a prompt.
fn variant_index(prompt: &str, variants: usize) -> usize {
    let digest = Sha256::digest(prompt.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(bytes) % variants as u64) as usize
}

/// Produces the canned text a backend answers with when it cannot generate.
#[derive(Debug, Clone, Copy)]
pub struct FallbackResponder {
    backend: BackendId,
}

impl FallbackResponder {
    pub fn new(backend: BackendId) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> BackendId {
        self.backend
    }

    /// Fallback text for a prompt. Never empty.
    pub fn respond(&self, prompt: &str) -> String {
        let variants = phrasings(self.backend, detect_language(prompt));
        variants[variant_index(prompt, variants.len())].to_string()
    }

    /// Fallback text for a prompt, split into word-sized fragments.
    pub fn fragments(&self, prompt: &str) -> Vec<Fragment> {
        split_words(&self.respond(prompt))
    }
}

/// Split text into fragments of one word plus its trailing whitespace.
///
/// Concatenating the fragments reproduces the input exactly.
pub fn split_words(text: &str) -> Vec<Fragment> {
    let mut fragments = Vec::new();
    let mut start = 0;
    let mut prev_whitespace = false;

    for (i, c) in text.char_indices() {
        if prev_whitespace && !c.is_whitespace() {
            fragments.push(Fragment::new(&text[start..i]));
            start = i;
        }
        prev_whitespace = c.is_whitespace();
    }
    if start < text.len() {
        fragments.push(Fragment::new(&text[start..]));
    }
    fragments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_language() {
        assert_eq!(detect_language("How do I sort a list, please?"), Language::English);
        assert_eq!(
            detect_language("Tolong jelaskan apa itu rekursi"),
            Language::Indonesian
        );
        assert_eq!(detect_language("terima kasih banyak"), Language::Indonesian);
        assert_eq!(detect_language("12345"), Language::English);
    }

    #[test]
    fn test_indicators_match_whole_words() {
        // "di" inside "dinner" and "ya" inside "yahoo" are not indicators
        assert_eq!(detect_language("dinner at yahoo"), Language::English);
    }

    #[test]
    fn test_fallback_is_deterministic() {
        let responder = FallbackResponder::new(BackendId::Coder);
        let a = responder.respond("fix my python function");
        let b = responder.respond("fix my python function");
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_fallback_differs_per_backend() {
        let prompt = "hello there";
        let coder = FallbackResponder::new(BackendId::Coder).respond(prompt);
        let general = FallbackResponder::new(BackendId::General).respond(prompt);
        assert_ne!(coder, general);
    }

    #[test]
    fn test_fallback_follows_language() {
        let responder = FallbackResponder::new(BackendId::General);
        let text = responder.respond("Bisakah anda bantu saya?");
        assert!(phrasings(BackendId::General, Language::Indonesian).contains(&text.as_str()));
    }

    #[test]
    fn test_variant_index_in_range() {
        for prompt in ["a", "b", "some longer prompt", ""] {
            assert!(variant_index(prompt, 3) < 3);
        }
    }

    #[test]
    fn test_split_words_reassembles() {
        let text = "Hello,  world!\nSecond line ";
        let fragments = split_words(text);
        let joined: String = fragments.iter().map(|f| f.text.as_str()).collect();
        assert_eq!(joined, text);
        assert_eq!(fragments[0].text, "Hello,  ");
        assert_eq!(fragments[1].text, "world!\n");
        assert!(fragments.iter().all(Fragment::is_real));
    }

    #[test]
    fn test_fallback_fragments_are_real() {
        let responder = FallbackResponder::new(BackendId::Multimodal);
        let fragments = responder.fragments("describe this image");
        assert!(fragments.len() > 1);
        assert!(fragments.iter().all(Fragment::is_real));
        let joined: String = fragments.iter().map(|f| f.text.as_str()).collect();
        assert_eq!(joined, responder.respond("describe this image"));
    }

    #[test]
    fn test_split_words_empty() {
        assert!(split_words("").is_empty());
    }
}
