use super::*;

const PARIS: &str = "Paris is the capital of France. It is known for the Eiffel Tower. The Louvre is a famous museum there.";

fn lecture_notes() -> String {
    "Photosynthesis converts light energy into chemical energy. ".repeat(20)
        + "Chlorophyll absorbs mostly blue and red light!  Why is it green? "
        + &"The Calvin cycle fixes carbon dioxide into sugars. ".repeat(15)
}

fn reconstruct(chunks: &[Chunk]) -> String {
    chunks.iter().map(Chunk::fresh_text).collect()
}

#[test]
fn count_tokens() {
    assert_eq!(super::count_tokens("hello world"), 2);
    assert_eq!(super::count_tokens("  This is   a test.\n"), 4);
    assert_eq!(super::count_tokens(""), 0);
}

#[test]
fn empty_document_yields_no_chunks() {
    let config = ChunkingConfig::default();
    let id = Uuid::new_v4();

    assert!(split(id, "", &config).expect("split should succeed").is_empty());
    assert!(
        split(id, "   \n\t ", &config)
            .expect("split should succeed")
            .is_empty()
    );
}

#[test]
fn short_document_is_single_chunk_without_overlap() {
    let config = ChunkingConfig::new(50, 10);
    let id = Uuid::new_v4();

    let chunks = split(id, PARIS, &config).expect("split should succeed");

    assert_eq!(chunks.len(), 1);
    let chunk = &chunks[0];
    assert_eq!(chunk.text, PARIS);
    assert_eq!(chunk.start, 0);
    assert_eq!(chunk.end, PARIS.len());
    assert_eq!(chunk.overlap_len, 0);
    assert!(!chunk.has_overlap());
    assert_eq!(chunk.token_count, 20);
    assert_eq!(chunk.document_id, id);
}

#[test]
fn sentence_sized_chunks() {
    let config = ChunkingConfig::new(7, 0);

    let chunks = split(Uuid::new_v4(), PARIS, &config).expect("split should succeed");

    let texts: Vec<&str> = chunks.iter().map(|c| c.text.trim_end()).collect();
    assert_eq!(
        texts,
        vec![
            "Paris is the capital of France.",
            "It is known for the Eiffel Tower.",
            "The Louvre is a famous museum there.",
        ]
    );
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.index, i);
        assert_eq!(&PARIS[chunk.start..chunk.end], chunk.text);
    }
}

#[test]
fn hard_split_without_sentence_boundaries() {
    let config = ChunkingConfig {
        max_tokens: 4,
        overlap_tokens: 0,
        sentence_boundary_splitting: false,
    };
    let text = "one two three four five six seven eight nine ten";

    let chunks = split(Uuid::new_v4(), text, &config).expect("split should succeed");

    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0].text, "one two three four ");
    assert_eq!(chunks[1].text, "five six seven eight ");
    assert_eq!(chunks[2].text, "nine ten");
    assert!(chunks.iter().all(|c| c.token_count <= 4));
}

#[test]
fn overlap_repeats_trailing_tokens() {
    let config = ChunkingConfig {
        max_tokens: 4,
        overlap_tokens: 2,
        sentence_boundary_splitting: false,
    };
    let text = "one two three four five six seven eight";

    let chunks = split(Uuid::new_v4(), text, &config).expect("split should succeed");

    assert_eq!(chunks[0].text, "one two three four ");
    assert_eq!(chunks[1].text, "three four five six ");
    assert_eq!(chunks[1].fresh_text(), "five six ");
    assert!(chunks[1].has_overlap());
    assert_eq!(chunks[1].fresh_start(), chunks[0].end);
    assert_eq!(chunks.last().map(|c| c.end), Some(text.len()));
}

#[test]
fn coverage_reconstructs_original_text() {
    let text = lecture_notes();
    for (max_tokens, overlap_tokens) in [(16, 0), (16, 5), (40, 12), (7, 6)] {
        for sentence_boundary_splitting in [true, false] {
            let config = ChunkingConfig {
                max_tokens,
                overlap_tokens,
                sentence_boundary_splitting,
            };
            let chunks = split(Uuid::new_v4(), &text, &config).expect("split should succeed");

            assert_eq!(reconstruct(&chunks), text, "config {:?}", config);
            for pair in chunks.windows(2) {
                assert!(pair[0].start < pair[1].start);
                assert_eq!(pair[0].end, pair[1].fresh_start());
            }
            assert!(chunks.iter().all(|c| c.token_count <= max_tokens));
        }
    }
}

#[test]
fn coverage_preserves_leading_whitespace_and_unicode() {
    let text = "\n\n  Größe und Maß: ça marche. 東京 は 大きい です。 Ünïcödé ends here!  ";
    let config = ChunkingConfig::new(3, 1);

    let chunks = split(Uuid::new_v4(), text, &config).expect("split should succeed");

    assert_eq!(chunks[0].start, 0);
    assert_eq!(reconstruct(&chunks), text);
}

#[test]
fn chunking_is_deterministic() {
    let text = lecture_notes();
    let config = ChunkingConfig::new(30, 8);
    let id = Uuid::new_v4();

    let first = split(id, &text, &config).expect("split should succeed");
    let second = split(id, &text, &config).expect("split should succeed");

    assert_eq!(first, second);
}

#[test]
fn prefers_sentence_boundaries() {
    let config = ChunkingConfig::new(12, 0);
    let text = "Short one. Another short sentence here. And a third sentence that runs long enough.";

    let chunks = split(Uuid::new_v4(), text, &config).expect("split should succeed");

    assert_eq!(chunks[0].text, "Short one. Another short sentence here. ");
}

#[test]
fn sentence_end_with_closing_quote() {
    assert!(is_sentence_end("stop.\""));
    assert!(is_sentence_end("(really?)"));
    assert!(!is_sentence_end("e.g"));
}

#[test]
fn invalid_parameters_are_rejected() {
    let id = Uuid::new_v4();

    let zero = ChunkingConfig::new(0, 0);
    assert!(matches!(
        split(id, PARIS, &zero),
        Err(ConfigError::InvalidMaxTokens(0))
    ));

    let overlap = ChunkingConfig::new(10, 10);
    assert!(matches!(
        split(id, PARIS, &overlap),
        Err(ConfigError::OverlapTooLarge(10, 10))
    ));
}
