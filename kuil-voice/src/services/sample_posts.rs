//! Built-in calibration samples
//!
//! Used whenever the gateway cannot supply a full sample set, so a session can
//! always reach its target.

use crate::models::SamplePost;

const BUILT_IN: [(&str, &str, &str); 12] = [
    (
        "builtin-01",
        "bold",
        "Most meetings should be emails. I cancelled every recurring meeting on my calendar last \
         month. Nothing broke. Three projects shipped early.",
    ),
    (
        "builtin-02",
        "warm",
        "My first manager once stayed two hours late to help me rewrite a proposal I was sure \
         would fail. It got approved. I think about that evening every time someone new joins \
         my team.",
    ),
    (
        "builtin-03",
        "analytical",
        "We tracked response times across 1,200 support tickets. Replies under an hour had a 34% \
         higher renewal rate. Speed was a stronger signal than resolution quality.",
    ),
    (
        "builtin-04",
        "storytelling",
        "The call came at 6am. Our biggest client was leaving. By noon we had a plan, by Friday \
         we had a new contract, and by the next quarter they had doubled their order.",
    ),
    (
        "builtin-05",
        "formal",
        "I am pleased to announce that I have accepted the position of Director of Operations. \
         I look forward to contributing to the organisation's continued growth.",
    ),
    (
        "builtin-06",
        "playful",
        "Day 47 of pretending I understand the new expense tool. The receipts are winning, but I \
         remain cautiously optimistic.",
    ),
    (
        "builtin-07",
        "bold",
        "Hot take: your five-year plan is a guess. Build skills that compound and stay ready for \
         the door you cannot see yet.",
    ),
    (
        "builtin-08",
        "empathetic",
        "If you were laid off this week, it is not a verdict on your worth. Take a breath. My \
         messages are open if you want a second pair of eyes on your CV.",
    ),
    (
        "builtin-09",
        "analytical",
        "Three patterns from reviewing 40 failed product launches: unclear buyer, late pricing \
         decisions, and no owner for onboarding. Fix those before writing a line of code.",
    ),
    (
        "builtin-10",
        "inspirational",
        "Ten years ago I was rejected from the same company I now lead a team at. Keep knocking. \
         Some doors open on the eleventh try.",
    ),
    (
        "builtin-11",
        "concise",
        "Ship small. Measure honestly. Repeat.",
    ),
    (
        "builtin-12",
        "conversational",
        "Quick question for the founders here: how do you decide when to hire your first \
         salesperson? I have heard everything from day one to never.",
    ),
];

/// The fixed sample set
pub fn built_in_samples() -> Vec<SamplePost> {
    BUILT_IN
        .iter()
        .map(|(id, tone, content)| SamplePost {
            sample_post_id: id.to_string(),
            tone_label: tone.to_string(),
            content: content.to_string(),
        })
        .collect()
}

/// `count` samples, repeating the fixed set for targets above its size
///
/// Repeats get a distinct id suffix so every position is addressable.
pub fn built_in_samples_for(count: usize) -> Vec<SamplePost> {
    let base = built_in_samples();
    (0..count)
        .map(|i| {
            let mut sample = base[i % base.len()].clone();
            let round = i / base.len();
            if round > 0 {
                sample.sample_post_id = format!("{}-r{}", sample.sample_post_id, round);
            }
            sample
        })
        .collect()
}
