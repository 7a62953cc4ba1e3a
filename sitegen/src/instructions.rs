/// Output contract sent as the system instruction on every call.
pub const SYSTEM_INSTRUCTION: &str = "\
You are an expert frontend engineer who builds beautiful, modern websites.

Respond with exactly one complete, self-contained HTML document and nothing else:
- Start with <!DOCTYPE html> and end with </html>.
- Do not wrap the document in markdown code fences and do not add any explanation before or after it.
- Style everything with Tailwind CSS loaded from the CDN: <script src=\"https://cdn.tailwindcss.com\"></script>.
- Design mobile-first and make every layout responsive.
- When the page needs imagery, use placeholder images from https://picsum.photos (for example https://picsum.photos/800/600).
- Inline any JavaScript the page needs in <script> tags.

When a current document is provided, treat it as the base to update: apply the requested change and return the full updated document.

When an image is attached, replicate its visual layout, color palette, typography and overall mood as closely as possible.";

/// Label for the prior document part of a request.
pub(crate) const CURRENT_DOCUMENT_LABEL: &str =
    "Here is the current HTML document. Use it as the base to update:";

/// Label for the conversation history part.
pub(crate) const HISTORY_LABEL: &str = "Conversation history:";

/// Label for the prompt of the turn being generated.
pub(crate) const REQUEST_LABEL: &str = "Current request:";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_instruction_fixes_output_contract() {
        assert!(SYSTEM_INSTRUCTION.contains("<!DOCTYPE html>"));
        assert!(SYSTEM_INSTRUCTION.contains("cdn.tailwindcss.com"));
        assert!(SYSTEM_INSTRUCTION.contains("picsum.photos"));
        assert!(SYSTEM_INSTRUCTION.contains("mobile-first"));
        assert!(SYSTEM_INSTRUCTION.contains("image is attached"));
    }
}
