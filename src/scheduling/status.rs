// src/scheduling/status.rs
//
// agendado -> em_atendimento -> concluido, with cancelado reachable from
// either of the first two. concluido and cancelado are terminal.

use crate::error::SchedulingError;
use crate::models::SchedulingStatus;

pub fn allowed_transitions(current: SchedulingStatus) -> &'static [SchedulingStatus] {
    match current {
        SchedulingStatus::Agendado => {
            &[SchedulingStatus::EmAtendimento, SchedulingStatus::Cancelado]
        }
        SchedulingStatus::EmAtendimento => {
            &[SchedulingStatus::Concluido, SchedulingStatus::Cancelado]
        }
        SchedulingStatus::Concluido => &[],
        SchedulingStatus::Cancelado => &[],
    }
}

pub fn can_transition(from: SchedulingStatus, to: SchedulingStatus) -> bool {
    allowed_transitions(from).contains(&to)
}

pub fn validate_transition(
    from: SchedulingStatus,
    to: SchedulingStatus,
) -> Result<(), SchedulingError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(SchedulingError::InvalidTransition { from, to })
    }
}

/// Contextual actions offered to the user for a record in this status.
pub fn available_actions(current: SchedulingStatus) -> Vec<&'static str> {
    allowed_transitions(current)
        .iter()
        .map(|next| match next {
            SchedulingStatus::EmAtendimento => "start",
            SchedulingStatus::Concluido => "complete",
            SchedulingStatus::Cancelado => "cancel",
            SchedulingStatus::Agendado => "reschedule",
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use SchedulingStatus::*;

    #[test]
    fn test_transition_matrix() {
        let all = [Agendado, EmAtendimento, Concluido, Cancelado];
        for from in all {
            for to in all {
                let expected = matches!(
                    (from, to),
                    (Agendado, EmAtendimento)
                        | (Agendado, Cancelado)
                        | (EmAtendimento, Concluido)
                        | (EmAtendimento, Cancelado)
                );
                assert_eq!(can_transition(from, to), expected, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_terminal_states_offer_no_actions() {
        assert!(available_actions(Concluido).is_empty());
        assert!(available_actions(Cancelado).is_empty());
    }

    #[test]
    fn test_contextual_actions() {
        assert_eq!(available_actions(Agendado), vec!["start", "cancel"]);
        assert_eq!(available_actions(EmAtendimento), vec!["complete", "cancel"]);
    }

    #[test]
    fn test_validate_transition_reports_both_ends() {
        let err = validate_transition(Concluido, EmAtendimento).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("concluido"), "{msg}");
        assert!(msg.contains("em_atendimento"), "{msg}");
    }
}
